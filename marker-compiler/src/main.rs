use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_circle_mut;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use marker_compiler::{
    decode, ArtifactStore, JobManager, MarkerImage, ServiceConfig, ARTIFACT_EXT, FORMAT_VERSION,
};

#[derive(Parser)]
#[command(name = "markerc", about = "Compile marker images into binary tracking files")]
struct Cli {
    /// TOML service configuration; defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a marker image into a .track tracking file
    Compile {
        image: PathBuf,
        /// Output path; defaults to the image path with a .track extension
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also write a PNG with the level-0 keypoints drawn on the marker
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Print the envelope summary of a compiled tracking file
    Inspect { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => ServiceConfig::load_toml(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ServiceConfig::default(),
    };

    match cli.command {
        Command::Compile { image, out, annotate } => compile(cfg, &image, out, annotate).await,
        Command::Inspect { file } => inspect(&file),
    }
}

async fn compile(
    cfg: ServiceConfig,
    image_path: &Path,
    out: Option<PathBuf>,
    annotate: Option<PathBuf>,
) -> Result<()> {
    if let Err(e) = marker_core::init_thread_pool(cfg.extractor.n_threads) {
        // Already initialized is fine; keep whatever pool exists
        debug!(error = %e, "rayon pool not replaced");
    }

    let bytes = std::fs::read(image_path)
        .with_context(|| format!("reading {}", image_path.display()))?;
    let filename = image_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("marker")
        .to_string();

    let artifacts = Arc::new(
        ArtifactStore::new(cfg.artifact_dir.clone()).context("creating artifact directory")?,
    );
    let manager = JobManager::new(cfg, artifacts.clone());

    let handle = manager
        .submit(bytes.clone(), &filename)
        .map_err(|e| anyhow::anyhow!("submission rejected: {}", e))?;
    info!(job = %handle.job_id, filename, "compiling");

    let mut printed = -1.0f32;
    let status = loop {
        let Some(status) = manager.status(handle.job_id) else {
            bail!("job disappeared from the store");
        };
        if status.state.is_terminal() {
            break status;
        }
        if status.progress != printed {
            println!("  {:>5.1}% {}", status.progress, status.state);
            printed = status.progress;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    if let Some(error) = status.error {
        bail!("compilation failed: {}", error);
    }

    let artifact_name = status.artifact.context("completed job has no artifact")?;
    let compiled = artifacts
        .get(&artifact_name)
        .map_err(|e| anyhow::anyhow!("fetching artifact: {}", e))?;

    let out = out.unwrap_or_else(|| image_path.with_extension(ARTIFACT_EXT));
    std::fs::write(&out, &compiled).with_context(|| format!("writing {}", out.display()))?;
    println!("wrote {} ({} bytes)", out.display(), compiled.len());

    if let Some(annotate_path) = annotate {
        write_annotation(&compiled, &bytes, manager.config(), &annotate_path)?;
    }

    Ok(())
}

/// Draw the level-0 keypoints over the prepared marker image
fn write_annotation(compiled: &[u8], original: &[u8], cfg: &ServiceConfig, path: &Path) -> Result<()> {
    let sets = decode(compiled).map_err(|e| anyhow::anyhow!("decoding artifact: {}", e))?;
    let level0 = sets
        .first()
        .and_then(|s| s.levels.first())
        .context("artifact has no levels")?;

    // Keypoint coordinates live in the prepared marker's space, so run the
    // same preparation again for the backdrop
    let marker = MarkerImage::prepare(original, "annotation", cfg)
        .map_err(|e| anyhow::anyhow!("re-preparing marker: {}", e))?;
    let gray = image::GrayImage::from_raw(marker.width as u32, marker.height as u32, marker.data)
        .context("marker buffer mismatch")?;
    let mut output: RgbaImage = image::DynamicImage::ImageLuma8(gray).into_rgba8();

    for record in &level0.records {
        draw_hollow_circle_mut(
            &mut output,
            (record.point.keypoint.x as i32, record.point.keypoint.y as i32),
            3,
            Rgba([255, 0, 0, 255]),
        );
    }

    output
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {} with {} keypoints", path.display(), level0.records.len());
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sets = decode(&bytes).map_err(|e| anyhow::anyhow!("not a valid tracking file: {}", e))?;

    println!("{}: format v{}, {} image(s)", path.display(), FORMAT_VERSION, sets.len());
    for (i, set) in sets.iter().enumerate() {
        println!("  image {}: {}x{}, {} level(s)", i, set.width, set.height, set.levels.len());
        for (j, level) in set.levels.iter().enumerate() {
            println!(
                "    level {:>2}: scale {:.3}, {}x{}, {} keypoints",
                j,
                level.scale,
                level.width,
                level.height,
                level.records.len()
            );
        }
    }
    Ok(())
}

use marker_brief::BriefGenerator;
use marker_core::ExtractorConfig;
use marker_fast::{FastDetector, ImagePyramid};
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::PipelineError;
use crate::format::{self, FeatureRecord, LevelFeatureSet, TrackingFeatureSet};
use crate::marker::MarkerImage;
use crate::progress::{ProgressEvent, ProgressSink};

/// Full compilation pipeline for one uploaded marker: prepare, extract,
/// gate on the minimum feature count, serialize.
pub fn compile_marker(
    bytes: &[u8],
    filename: &str,
    cfg: &ServiceConfig,
    sink: &dyn ProgressSink,
) -> Result<Vec<u8>, PipelineError> {
    let marker = MarkerImage::prepare(bytes, filename, cfg)?;
    let sets = extract_feature_sets(std::slice::from_ref(&marker), &cfg.extractor, sink)?;

    let total: usize = sets.iter().flat_map(|s| s.levels.iter()).map(|l| l.records.len()).sum();
    if total < cfg.min_keypoints {
        return Err(PipelineError::TooFewFeatures {
            found: total,
            required: cfg.min_keypoints,
        });
    }

    format::encode(&sets).map_err(PipelineError::Serialize)
}

/// Extract per-level features from every marker, reporting progress.
///
/// Images are processed sequentially so progress accounting stays
/// deterministic: each image owns `100 / imageCount` percent, split evenly
/// across its pyramid levels. The final event always carries exactly 100.
pub fn extract_feature_sets(
    markers: &[MarkerImage],
    cfg: &ExtractorConfig,
    sink: &dyn ProgressSink,
) -> Result<Vec<TrackingFeatureSet>, PipelineError> {
    if markers.is_empty() {
        return Ok(Vec::new());
    }

    let percent_per_image = 100.0f64 / markers.len() as f64;
    let mut sets = Vec::with_capacity(markers.len());

    for (image_index, marker) in markers.iter().enumerate() {
        let levels = ImagePyramid::generate_levels(marker.width, marker.height);
        let pyramid = ImagePyramid::build(&marker.data, marker.width, marker.height, &levels)?;
        let percent_per_level = percent_per_image / levels.len() as f64;

        let mut level_sets = Vec::with_capacity(levels.len());
        for (level, buf) in levels.iter().zip(pyramid.iter()) {
            let detector = FastDetector::new(cfg.clone(), level.width, level.height)?;
            let keypoints = detector.detect(buf)?;

            let brief = BriefGenerator::new(level.width, level.height);
            let plain: Vec<_> = keypoints.iter().map(|sk| sk.keypoint).collect();
            let descriptors = brief.generate_descriptors(buf, &plain);

            debug!(
                image = %marker.filename,
                level = level.level,
                keypoints = keypoints.len(),
                "level extracted"
            );

            level_sets.push(LevelFeatureSet {
                scale: level.scale,
                width: level.width as u32,
                height: level.height as u32,
                records: keypoints
                    .into_iter()
                    .zip(descriptors)
                    .map(|(point, descriptor)| FeatureRecord { point, descriptor })
                    .collect(),
            });

            sink.report(ProgressEvent::LevelCompleted {
                image_index,
                level: level.level,
                percent: (image_index as f64 * percent_per_image
                    + (level.level + 1) as f64 * percent_per_level) as f32,
            });
        }

        let is_last = image_index + 1 == markers.len();
        sink.report(ProgressEvent::ImageCompleted {
            image_index,
            // Pin the terminal value so float accumulation cannot stop short
            percent: if is_last {
                100.0
            } else {
                ((image_index + 1) as f64 * percent_per_image) as f32
            },
        });

        sets.push(TrackingFeatureSet {
            width: marker.width as u32,
            height: marker.height as u32,
            levels: level_sets,
        });
    }

    Ok(sets)
}

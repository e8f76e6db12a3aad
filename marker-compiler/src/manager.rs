use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::SubmitError;
use crate::extract::compile_marker;
use crate::format::ARTIFACT_EXT;
use crate::job::{JobStatus, JobStore};
use crate::marker::payload_looks_like_image;
use crate::progress::{ChannelSink, ProgressEvent};
use crate::store::ArtifactStore;

/// Returned to the caller at submission; the artifact name is fixed up
/// front so a download URL can be constructed before the job finishes.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub artifact_name: String,
}

struct QueuedJob {
    id: Uuid,
    bytes: Vec<u8>,
    filename: String,
    artifact_name: String,
}

/// Owns the job store and the bounded worker pool.
///
/// Submission validates synchronously, enqueues and returns immediately;
/// compilation runs on blocking worker threads, at most `workers` at a
/// time, with excess submissions waiting in the dispatch queue. Each job
/// id is enqueued exactly once, so a pipeline never runs twice for the
/// same id.
pub struct JobManager {
    cfg: ServiceConfig,
    store: Arc<JobStore>,
    artifacts: Arc<ArtifactStore>,
    queue: mpsc::UnboundedSender<QueuedJob>,
    reaper: task::JoinHandle<()>,
}

impl JobManager {
    pub fn new(cfg: ServiceConfig, artifacts: Arc<ArtifactStore>) -> Self {
        let store = Arc::new(JobStore::new());

        let (queue, rx) = mpsc::unbounded_channel();
        task::spawn(dispatch_loop(rx, cfg.clone(), store.clone(), artifacts.clone()));
        let reaper = task::spawn(reaper_loop(store.clone(), cfg.clone()));

        Self { cfg, store, artifacts, queue, reaper }
    }

    /// Validate and enqueue a marker compilation.
    ///
    /// Validation here is shallow on purpose: an empty payload, a missing
    /// filename or bytes that do not carry a known image signature are
    /// client errors; a recognisable but corrupt payload is accepted and
    /// surfaces its decode error through job status.
    pub fn submit(&self, bytes: Vec<u8>, filename: &str) -> Result<JobHandle, SubmitError> {
        if filename.trim().is_empty() {
            return Err(SubmitError::MissingFilename);
        }
        if bytes.is_empty() {
            return Err(SubmitError::EmptyPayload);
        }
        if !payload_looks_like_image(&bytes) {
            return Err(SubmitError::UnrecognizedFormat);
        }

        let id = Uuid::new_v4();
        let artifact_name = format!("{}.{}", id, ARTIFACT_EXT);
        self.store.create(id, filename, Utc::now());

        let queued = QueuedJob {
            id,
            bytes,
            filename: filename.to_string(),
            artifact_name: artifact_name.clone(),
        };
        if self.queue.send(queued).is_err() {
            self.store.fail(id, "Compilation queue is shut down".to_string());
            return Err(SubmitError::QueueClosed);
        }

        info!(job = %id, filename, "job submitted");
        Ok(JobHandle { job_id: id, artifact_name })
    }

    pub fn status(&self, id: Uuid) -> Option<JobStatus> {
        self.store.status(id)
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.cfg
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    cfg: ServiceConfig,
    store: Arc<JobStore>,
    artifacts: Arc<ArtifactStore>,
) {
    let semaphore = Arc::new(Semaphore::new(cfg.workers.max(1)));

    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };

        let cfg = cfg.clone();
        let store = store.clone();
        let artifacts = artifacts.clone();
        task::spawn(async move {
            let _permit = permit;
            run_job(job, cfg, store, artifacts).await;
        });
    }
}

/// Execute one compilation; every failure path ends in a terminal
/// `failed` record and nothing escapes to the runtime.
async fn run_job(job: QueuedJob, cfg: ServiceConfig, store: Arc<JobStore>, artifacts: Arc<ArtifactStore>) {
    let QueuedJob { id, bytes, filename, artifact_name } = job;

    store.mark_running(id);
    info!(job = %id, "compilation started");

    let (tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let progress_store = store.clone();
    let aggregator = task::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            progress_store.update_progress(id, event.percent());
        }
    });

    let pipeline_cfg = cfg.clone();
    let result = task::spawn_blocking(move || {
        let sink = ChannelSink::new(tx);
        compile_marker(&bytes, &filename, &pipeline_cfg, &sink)
    })
    .await;

    // The sink was dropped with the blocking closure; drain the channel so
    // every progress write lands before the terminal transition
    let _ = aggregator.await;

    match result {
        Ok(Ok(encoded)) => match artifacts.put(&artifact_name, &encoded) {
            Ok(()) => {
                if store.complete(id, artifact_name.clone()) {
                    info!(job = %id, artifact = %artifact_name, "compilation completed");
                } else {
                    // The reaper got there first; never expose the artifact
                    let _ = artifacts.remove(&artifact_name);
                    error!(job = %id, "job already terminal, artifact discarded");
                }
            }
            Err(e) => {
                error!(job = %id, error = %e, "artifact publication failed");
                store.fail(id, format!("Could not store artifact: {}", e));
            }
        },
        Ok(Err(e)) => {
            info!(job = %id, error = %e, "compilation failed");
            store.fail(id, e.to_string());
        }
        Err(e) => {
            error!(job = %id, error = %e, "pipeline worker crashed");
            store.fail(id, "Compilation worker crashed".to_string());
        }
    }
}

async fn reaper_loop(store: Arc<JobStore>, cfg: ServiceConfig) {
    let period = std::time::Duration::from_secs(cfg.reap_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let now = Utc::now();
        store.reap_stalled(ChronoDuration::seconds(cfg.job_deadline_secs as i64), now);
        store.gc_expired(ChronoDuration::seconds(cfg.job_ttl_secs as i64), now);
    }
}

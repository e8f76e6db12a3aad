use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

/// Lifecycle of one compilation run; transitions only move forward:
/// queued → running → {completed | failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub filename: String,
    pub state: JobState,
    pub progress: f32,
    pub created_at: DateTime<Utc>,
    pub artifact: Option<String>,
    pub error: Option<String>,
}

/// Consistent point-in-time view of a job
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub progress: f32,
    pub artifact: Option<String>,
    pub error: Option<String>,
}

/// Volatile, synchronized store for all jobs.
///
/// One lock guards the whole record, so a poll never observes progress
/// from one update paired with a stale state. Owned by the job manager
/// and injected where needed; nothing reads it through a global.
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, id: Uuid, filename: &str, now: DateTime<Utc>) {
        let mut jobs = self.jobs.write().expect("job store poisoned");
        jobs.insert(
            id,
            Job {
                id,
                filename: filename.to_string(),
                state: JobState::Queued,
                progress: 0.0,
                created_at: now,
                artifact: None,
                error: None,
            },
        );
    }

    pub fn status(&self, id: Uuid) -> Option<JobStatus> {
        let jobs = self.jobs.read().expect("job store poisoned");
        jobs.get(&id).map(|job| JobStatus {
            state: job.state,
            progress: job.progress,
            artifact: job.artifact.clone(),
            error: job.error.clone(),
        })
    }

    pub fn mark_running(&self, id: Uuid) {
        let mut jobs = self.jobs.write().expect("job store poisoned");
        if let Some(job) = jobs.get_mut(&id) {
            if job.state == JobState::Queued {
                job.state = JobState::Running;
            }
        }
    }

    /// Monotonic progress update; ignored once the job is terminal
    pub fn update_progress(&self, id: Uuid, percent: f32) {
        let mut jobs = self.jobs.write().expect("job store poisoned");
        if let Some(job) = jobs.get_mut(&id) {
            if !job.state.is_terminal() && percent > job.progress {
                job.progress = percent.clamp(0.0, 100.0);
            }
        }
    }

    /// Terminal success; the artifact reference becomes visible here and
    /// nowhere earlier. Returns false when the job was no longer running,
    /// e.g. already failed by the reaper.
    pub fn complete(&self, id: Uuid, artifact: String) -> bool {
        let mut jobs = self.jobs.write().expect("job store poisoned");
        if let Some(job) = jobs.get_mut(&id) {
            if job.state == JobState::Running {
                job.state = JobState::Completed;
                job.progress = 100.0;
                job.artifact = Some(artifact);
                return true;
            }
        }
        false
    }

    /// Terminal failure from any non-terminal state
    pub fn fail(&self, id: Uuid, message: String) {
        let mut jobs = self.jobs.write().expect("job store poisoned");
        if let Some(job) = jobs.get_mut(&id) {
            if !job.state.is_terminal() {
                job.state = JobState::Failed;
                job.error = Some(message);
            }
        }
    }

    /// Fail every non-terminal job older than `deadline`; returns the ids
    pub fn reap_stalled(&self, deadline: Duration, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut jobs = self.jobs.write().expect("job store poisoned");
        let mut reaped = Vec::new();
        for job in jobs.values_mut() {
            if !job.state.is_terminal() && now - job.created_at > deadline {
                job.state = JobState::Failed;
                job.error = Some(format!(
                    "Compilation exceeded the {}s deadline",
                    deadline.num_seconds()
                ));
                reaped.push(job.id);
            }
        }
        for id in &reaped {
            warn!(job = %id, "reaped stalled job");
        }
        reaped
    }

    /// Drop terminal jobs older than `ttl`; returns how many were removed
    pub fn gc_expired(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().expect("job store poisoned");
        let before = jobs.len();
        jobs.retain(|_, job| !(job.state.is_terminal() && now - job.created_at > ttl));
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().expect("job store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_job(id: Uuid, now: DateTime<Utc>) -> JobStore {
        let store = JobStore::new();
        store.create(id, "marker.png", now);
        store
    }

    #[test]
    fn new_job_is_queued_at_zero() {
        let id = Uuid::new_v4();
        let store = store_with_job(id, Utc::now());
        let status = store.status(id).unwrap();
        assert_eq!(status.state, JobState::Queued);
        assert_eq!(status.progress, 0.0);
        assert!(status.artifact.is_none());
        assert!(status.error.is_none());
    }

    #[test]
    fn unknown_id_is_none() {
        let store = JobStore::new();
        assert!(store.status(Uuid::new_v4()).is_none());
    }

    #[test]
    fn progress_is_monotonic() {
        let id = Uuid::new_v4();
        let store = store_with_job(id, Utc::now());
        store.mark_running(id);

        store.update_progress(id, 40.0);
        store.update_progress(id, 20.0);
        assert_eq!(store.status(id).unwrap().progress, 40.0);

        store.update_progress(id, 90.0);
        assert_eq!(store.status(id).unwrap().progress, 90.0);
    }

    #[test]
    fn complete_requires_running() {
        let id = Uuid::new_v4();
        let store = store_with_job(id, Utc::now());

        // Still queued; completion must not apply
        assert!(!store.complete(id, "a.track".into()));
        assert_eq!(store.status(id).unwrap().state, JobState::Queued);

        store.mark_running(id);
        assert!(store.complete(id, "a.track".into()));
        let status = store.status(id).unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, 100.0);
        assert_eq!(status.artifact.as_deref(), Some("a.track"));
    }

    #[test]
    fn terminal_states_are_frozen() {
        let id = Uuid::new_v4();
        let store = store_with_job(id, Utc::now());
        store.mark_running(id);
        store.fail(id, "boom".into());

        store.update_progress(id, 99.0);
        store.complete(id, "late.track".into());
        store.mark_running(id);

        let status = store.status(id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("boom"));
        assert!(status.artifact.is_none());
    }

    #[test]
    fn fail_preserves_progress() {
        let id = Uuid::new_v4();
        let store = store_with_job(id, Utc::now());
        store.mark_running(id);
        store.update_progress(id, 60.0);
        store.fail(id, "decode error".into());

        let status = store.status(id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.progress, 60.0);
    }

    #[test]
    fn reaper_fails_only_old_nonterminal_jobs() {
        let store = JobStore::new();
        let now = Utc::now();
        let old = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let done = Uuid::new_v4();

        store.create(old, "old.png", now - Duration::seconds(600));
        store.create(fresh, "fresh.png", now);
        store.create(done, "done.png", now - Duration::seconds(600));
        store.mark_running(done);
        store.complete(done, "done.track".into());

        let reaped = store.reap_stalled(Duration::seconds(300), now);
        assert_eq!(reaped, vec![old]);

        assert_eq!(store.status(old).unwrap().state, JobState::Failed);
        assert!(store.status(old).unwrap().error.is_some());
        assert_eq!(store.status(fresh).unwrap().state, JobState::Queued);
        assert_eq!(store.status(done).unwrap().state, JobState::Completed);
    }

    #[test]
    fn gc_drops_only_expired_terminal_jobs() {
        let store = JobStore::new();
        let now = Utc::now();
        let expired = Uuid::new_v4();
        let running = Uuid::new_v4();

        store.create(expired, "a.png", now - Duration::seconds(7200));
        store.mark_running(expired);
        store.fail(expired, "old failure".into());
        store.create(running, "b.png", now - Duration::seconds(7200));
        store.mark_running(running);

        let dropped = store.gc_expired(Duration::seconds(3600), now);
        assert_eq!(dropped, 1);
        assert!(store.status(expired).is_none());
        assert!(store.status(running).is_some());
    }
}

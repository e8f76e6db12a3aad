use tokio::sync::mpsc;

/// Progress emitted by the extraction pipeline, one event per completed
/// unit of work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    LevelCompleted { image_index: usize, level: usize, percent: f32 },
    ImageCompleted { image_index: usize, percent: f32 },
}

impl ProgressEvent {
    pub fn percent(&self) -> f32 {
        match self {
            ProgressEvent::LevelCompleted { percent, .. } => *percent,
            ProgressEvent::ImageCompleted { percent, .. } => *percent,
        }
    }
}

/// Receives progress events from deep inside extraction.
///
/// The pipeline runs on a blocking thread, so implementations must not
/// await; the channel sink uses an unbounded sender for that reason.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Discards all events; for direct library use and tests
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events over a tokio channel to the job manager's aggregator
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn report(&self, event: ProgressEvent) {
        // Receiver dropping mid-job only means nobody is watching anymore
        let _ = self.tx.send(event);
    }
}

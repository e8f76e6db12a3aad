//! Asynchronous compilation of planar marker images into binary tracking
//! files.
//!
//! A caller submits raw image bytes and gets a job id back immediately;
//! the pyramid build and feature extraction run on a bounded pool of
//! blocking workers, report progress over a channel, and publish a
//! versioned `.track` artifact that the download gateway serves by an
//! opaque, validated name.

pub mod config;
pub mod error;
pub mod extract;
pub mod format;
pub mod job;
pub mod manager;
pub mod marker;
pub mod progress;
pub mod store;

pub use config::{ConfigError, ServiceConfig};
pub use error::{PipelineError, SubmitError};
pub use extract::{compile_marker, extract_feature_sets};
pub use format::{
    decode, encode, FeatureRecord, FormatError, LevelFeatureSet, TrackingFeatureSet, ARTIFACT_EXT,
    FORMAT_VERSION, MAGIC,
};
pub use job::{Job, JobState, JobStatus, JobStore};
pub use manager::{JobHandle, JobManager};
pub use marker::MarkerImage;
pub use progress::{ChannelSink, NullSink, ProgressEvent, ProgressSink};
pub use store::{ArtifactStore, DownloadError};

use std::path::{Path, PathBuf};

use marker_core::ExtractorConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Could not read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Could not parse config file: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Service-wide configuration for the compilation pipeline and job manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Concurrent compilation pipelines; further submissions queue
    pub workers: usize,
    /// Directory compiled artifacts are published into
    pub artifact_dir: PathBuf,
    /// Terminal jobs older than this are garbage-collected
    pub job_ttl_secs: u64,
    /// Non-terminal jobs older than this are failed by the reaper
    pub job_deadline_secs: u64,
    pub reap_interval_secs: u64,
    /// Markers are downscaled until their longest edge fits this
    pub max_marker_edge: u32,
    /// Markers with a shorter edge below this fail compilation
    pub min_marker_edge: u32,
    /// Minimum variance-of-Laplacian sharpness
    pub min_sharpness: f64,
    /// Minimum total keypoints across all levels
    pub min_keypoints: usize,
    pub apply_clahe: bool,
    pub extractor: ExtractorConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            artifact_dir: PathBuf::from("artifacts"),
            job_ttl_secs: 3600,
            job_deadline_secs: 240,
            reap_interval_secs: 30,
            max_marker_edge: 512,
            min_marker_edge: 64,
            min_sharpness: 100.0,
            min_keypoints: 50,
            apply_clahe: true,
            extractor: ExtractorConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be > 0".into()));
        }
        if self.job_deadline_secs == 0 {
            return Err(ConfigError::Invalid("job_deadline_secs must be > 0".into()));
        }
        if self.min_marker_edge > self.max_marker_edge {
            return Err(ConfigError::Invalid(format!(
                "min_marker_edge {} exceeds max_marker_edge {}",
                self.min_marker_edge, self.max_marker_edge
            )));
        }
        if self.extractor.threshold == 0 || self.extractor.threshold > 127 {
            return Err(ConfigError::Invalid(format!(
                "extractor threshold {} out of range 1-127",
                self.extractor.threshold
            )));
        }
        if self.extractor.patch_size % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "extractor patch_size {} must be odd",
                self.extractor.patch_size
            )));
        }
        Ok(())
    }

    /// Serialize to JSON string for diagnostics
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

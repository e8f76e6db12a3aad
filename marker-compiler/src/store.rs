use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::format::ARTIFACT_EXT;

#[derive(Debug)]
pub enum DownloadError {
    /// Malformed or disallowed artifact name; a client error
    InvalidName(String),
    /// Well-formed name with no stored artifact behind it
    NotFound(String),
    /// Storage I/O failure; a server error
    Io(io::Error),
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadError::InvalidName(name) => write!(f, "Invalid artifact name: {:?}", name),
            DownloadError::NotFound(name) => write!(f, "Artifact not found: {}", name),
            DownloadError::Io(e) => write!(f, "Artifact storage error: {}", e),
        }
    }
}

impl std::error::Error for DownloadError {}

/// Filesystem-backed store for compiled tracking files.
///
/// Serves as the download gateway: names are opaque, validated against
/// traversal, and only `.track` files are ever resolved. Writes go to a
/// scratch file first and are renamed into place, so a partially written
/// artifact is never downloadable.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject traversal sequences, separators and foreign extensions
    pub fn validate_name(name: &str) -> Result<(), DownloadError> {
        let invalid = |reason: &str| Err(DownloadError::InvalidName(format!("{} ({})", name, reason)));

        if name.is_empty() {
            return invalid("empty");
        }
        if name.contains('/') || name.contains('\\') {
            return invalid("path separator");
        }
        if name.contains("..") {
            return invalid("traversal sequence");
        }
        match name.strip_suffix(&format!(".{}", ARTIFACT_EXT)) {
            Some(stem) if !stem.is_empty() => Ok(()),
            _ => invalid("expected .track extension"),
        }
    }

    /// Publish an artifact under `name`, atomically with respect to readers
    pub fn put(&self, name: &str, bytes: &[u8]) -> Result<(), DownloadError> {
        Self::validate_name(name)?;

        let scratch = self.root.join(format!("{}.part", name));
        let target = self.root.join(name);

        fs::write(&scratch, bytes).map_err(DownloadError::Io)?;
        fs::rename(&scratch, &target).map_err(DownloadError::Io)?;

        debug!(artifact = name, size = bytes.len(), "artifact stored");
        Ok(())
    }

    /// Resolve a validated name to its stored bytes
    pub fn get(&self, name: &str) -> Result<Vec<u8>, DownloadError> {
        Self::validate_name(name)?;

        match fs::read(self.root.join(name)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DownloadError::NotFound(name.to_string()))
            }
            Err(e) => Err(DownloadError::Io(e)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        Self::validate_name(name).is_ok() && self.root.join(name).exists()
    }

    /// Remove a stored artifact; absent files are not an error
    pub fn remove(&self, name: &str) -> Result<(), DownloadError> {
        Self::validate_name(name)?;
        match fs::remove_file(self.root.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::Io(e)),
        }
    }
}

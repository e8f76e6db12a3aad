#[derive(Debug, Clone)]
pub enum DetectError {
    InvalidImageSize { width: usize, height: usize },
    InvalidImageData { expected_len: usize, actual_len: usize },
    InvalidThreshold(u8),
    InvalidPatchSize(usize),
}

impl std::fmt::Display for DetectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectError::InvalidImageSize { width, height } => {
                write!(f, "Invalid image dimensions: {}x{} (must be > 0)", width, height)
            }
            DetectError::InvalidImageData { expected_len, actual_len } => {
                write!(f, "Image data length mismatch: expected {}, got {}", expected_len, actual_len)
            }
            DetectError::InvalidThreshold(t) => {
                write!(f, "Invalid threshold: {} (must be 1-127)", t)
            }
            DetectError::InvalidPatchSize(p) => {
                write!(f, "Invalid patch size: {} (must be odd)", p)
            }
        }
    }
}

impl std::error::Error for DetectError {}

pub type DetectResult<T> = Result<T, DetectError>;

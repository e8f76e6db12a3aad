use marker_fast::DetectError;

/// Synchronous submission rejections; reported to the caller before any
/// job exists.
#[derive(Debug)]
pub enum SubmitError {
    EmptyPayload,
    MissingFilename,
    UnrecognizedFormat,
    QueueClosed,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::EmptyPayload => write!(f, "No image data provided"),
            SubmitError::MissingFilename => write!(f, "No filename provided"),
            SubmitError::UnrecognizedFormat => {
                write!(f, "Payload is not a recognizable image format")
            }
            SubmitError::QueueClosed => write!(f, "Compilation queue is shut down"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Failures inside the asynchronous worker; recorded on the job as a
/// terminal `failed` state, never propagated out of the pipeline.
#[derive(Debug)]
pub enum PipelineError {
    Decode(image::ImageError),
    MarkerTooSmall { width: u32, height: u32, min_edge: u32 },
    TooBlurry { sharpness: f64, min_sharpness: f64 },
    TooFewFeatures { found: usize, required: usize },
    Detect(DetectError),
    Serialize(std::io::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Decode(e) => write!(f, "Could not decode image: {}", e),
            PipelineError::MarkerTooSmall { width, height, min_edge } => {
                write!(f, "Image too small ({}x{}, need {}x{}+)", width, height, min_edge, min_edge)
            }
            PipelineError::TooBlurry { sharpness, min_sharpness } => {
                write!(f, "Image too blurry (sharpness: {:.1}, need {:.1}+)", sharpness, min_sharpness)
            }
            PipelineError::TooFewFeatures { found, required } => {
                write!(f, "Not enough trackable features ({} found, need {}+)", found, required)
            }
            PipelineError::Detect(e) => write!(f, "Feature extraction failed: {}", e),
            PipelineError::Serialize(e) => write!(f, "Could not serialize tracking data: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<DetectError> for PipelineError {
    fn from(err: DetectError) -> Self {
        PipelineError::Detect(err)
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Decode(err)
    }
}

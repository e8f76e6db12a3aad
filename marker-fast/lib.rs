//! FAST corner detection, image pyramid and keypoint refinement for planar
//! marker tracking. Detection operates on a single pyramid level; callers
//! drive the levels so they can account for per-level work.

mod corner;
mod detector;
mod error;
mod preprocess;
mod pyramid;
mod refine;
mod types;

pub use corner::CornerDetector;
pub use detector::FastDetector;
pub use error::{DetectError, DetectResult};
pub use preprocess::ImagePreprocessing;
pub use pyramid::{ImagePyramid, MAX_PYRAMID_LEVELS, MIN_LEVEL_DIM, PYRAMID_SCALE_STEP};
pub use refine::KeypointRefinement;
pub use types::{PyramidLevel, ScoredKeypoint};

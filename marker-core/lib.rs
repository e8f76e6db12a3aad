/// Row-major 8-bit grayscale image
pub type Image = Vec<u8>;

/// Key-point ≙ FAST corner + orientation (radians) with subpixel precision
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Keypoint {
    pub x: f32,      // Subpixel x coordinate
    pub y: f32,      // Subpixel y coordinate
    pub angle: f32,
}

/// 256-bit binary descriptor = 32 bytes
pub type Descriptor = [u8; 32];

/// Byte length of a [`Descriptor`]
pub const DESCRIPTOR_LEN: usize = 32;

/// Tuning knobs for keypoint extraction.
///
/// `max_keypoints_per_level` caps the strongest corners kept on each pyramid
/// level after suppression; 0 means unlimited.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct ExtractorConfig {
    pub threshold: u8,
    pub patch_size: usize,
    pub nms_distance: f32,
    pub max_keypoints_per_level: usize,
    pub n_threads: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            threshold: 20,
            patch_size: 15,
            nms_distance: 3.0,
            max_keypoints_per_level: 500,
            n_threads: num_cpus::get().max(1),
        }
    }
}

/// Initialize Rayon thread pool with the specified number of threads
pub fn init_thread_pool(n_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()
}

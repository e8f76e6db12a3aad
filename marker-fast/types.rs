use marker_core::Keypoint;

/// Keypoint with corner response score for NMS
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredKeypoint {
    pub keypoint: Keypoint,
    pub response: f32,
}

/// Geometry of one pyramid level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidLevel {
    pub level: usize,
    /// Scale factor relative to the source image; 1.0 at level 0,
    /// strictly decreasing thereafter.
    pub scale: f32,
    pub width: usize,
    pub height: usize,
}

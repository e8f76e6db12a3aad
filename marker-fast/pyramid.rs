use marker_core::Image;

use crate::error::{DetectError, DetectResult};
use crate::types::PyramidLevel;

/// Per-level downscale factor (standard ORB scale step)
pub const PYRAMID_SCALE_STEP: f32 = 1.2;
/// Smallest edge a derived level may have
pub const MIN_LEVEL_DIM: usize = 32;
/// Hard cap on pyramid depth
pub const MAX_PYRAMID_LEVELS: usize = 8;

/// Image pyramid operations for multi-scale feature detection
pub struct ImagePyramid;

impl ImagePyramid {
    /// Generate level geometry for an image pyramid.
    ///
    /// Level 0 always matches the source dimensions; each further level
    /// divides the scale by [`PYRAMID_SCALE_STEP`] and derives its
    /// dimensions with floor rounding (`(dim as f32 * scale) as usize`),
    /// so level sizes are deterministic for a given source size. An image
    /// already at or below [`MIN_LEVEL_DIM`] yields a single level.
    pub fn generate_levels(width: usize, height: usize) -> Vec<PyramidLevel> {
        let mut levels = vec![PyramidLevel {
            level: 0,
            scale: 1.0,
            width,
            height,
        }];

        let mut scale = 1.0f32;
        while levels.len() < MAX_PYRAMID_LEVELS {
            scale /= PYRAMID_SCALE_STEP;
            let scaled_width = (width as f32 * scale) as usize;
            let scaled_height = (height as f32 * scale) as usize;

            // Stop when the image becomes too small for meaningful detection
            if scaled_width < MIN_LEVEL_DIM || scaled_height < MIN_LEVEL_DIM {
                break;
            }

            levels.push(PyramidLevel {
                level: levels.len(),
                scale,
                width: scaled_width,
                height: scaled_height,
            });
        }

        levels
    }

    /// Build pixel buffers for every level of the pyramid
    pub fn build(img: &Image, width: usize, height: usize, levels: &[PyramidLevel]) -> DetectResult<Vec<Image>> {
        if width == 0 || height == 0 {
            return Err(DetectError::InvalidImageSize { width, height });
        }
        if img.len() != width * height {
            return Err(DetectError::InvalidImageData {
                expected_len: width * height,
                actual_len: img.len(),
            });
        }

        let mut pyramid = Vec::with_capacity(levels.len());
        for level in levels {
            if level.level == 0 {
                pyramid.push(img.clone());
            } else {
                pyramid.push(Self::downsample(img, width, height, level.width, level.height));
            }
        }
        Ok(pyramid)
    }

    /// Downsample image using bilinear interpolation
    fn downsample(img: &Image, src_width: usize, src_height: usize, target_width: usize, target_height: usize) -> Image {
        let mut downsampled = vec![0u8; target_width * target_height];

        let x_ratio = src_width as f32 / target_width as f32;
        let y_ratio = src_height as f32 / target_height as f32;

        for y in 0..target_height {
            for x in 0..target_width {
                let src_x = x as f32 * x_ratio;
                let src_y = y as f32 * y_ratio;

                let value = Self::bilinear_sample(img, src_width, src_height, src_x, src_y);
                downsampled[y * target_width + x] = value as u8;
            }
        }

        downsampled
    }

    /// Sample image at fractional coordinates using bilinear interpolation
    fn bilinear_sample(img: &Image, width: usize, height: usize, x: f32, y: f32) -> f32 {
        let x1 = x.floor() as usize;
        let y1 = y.floor() as usize;
        let x2 = (x1 + 1).min(width - 1);
        let y2 = (y1 + 1).min(height - 1);

        let fx = x - x1 as f32;
        let fy = y - y1 as f32;

        let p11 = img[y1 * width + x1] as f32;
        let p12 = img[y1 * width + x2] as f32;
        let p21 = img[y2 * width + x1] as f32;
        let p22 = img[y2 * width + x2] as f32;

        let interpolated_top = p11 * (1.0 - fx) + p12 * fx;
        let interpolated_bottom = p21 * (1.0 - fx) + p22 * fx;

        interpolated_top * (1.0 - fy) + interpolated_bottom * fy
    }
}

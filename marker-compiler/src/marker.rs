use image::imageops::FilterType;
use marker_core::Image;
use marker_fast::ImagePreprocessing;

use crate::config::ServiceConfig;
use crate::error::PipelineError;

/// A decoded grayscale marker ready for extraction
#[derive(Debug, Clone)]
pub struct MarkerImage {
    pub data: Image,
    pub width: usize,
    pub height: usize,
    pub filename: String,
}

/// Cheap synchronous check that a payload at least carries a known image
/// container signature. Full decoding happens inside the worker.
pub fn payload_looks_like_image(bytes: &[u8]) -> bool {
    image::guess_format(bytes).is_ok()
}

impl MarkerImage {
    /// Decode, gate and normalise an uploaded marker.
    ///
    /// Rejects markers below the minimum edge, downscales so the longest
    /// edge fits `max_marker_edge` (Lanczos3), applies the sharpness gate
    /// on the grayscale buffer and finally runs CLAHE when configured.
    pub fn prepare(bytes: &[u8], filename: &str, cfg: &ServiceConfig) -> Result<Self, PipelineError> {
        let decoded = image::load_from_memory(bytes)?;

        let (width, height) = (decoded.width(), decoded.height());
        if width.min(height) < cfg.min_marker_edge {
            return Err(PipelineError::MarkerTooSmall {
                width,
                height,
                min_edge: cfg.min_marker_edge,
            });
        }

        let decoded = if width.max(height) > cfg.max_marker_edge {
            decoded.resize(cfg.max_marker_edge, cfg.max_marker_edge, FilterType::Lanczos3)
        } else {
            decoded
        };

        let gray = decoded.to_luma8();
        let mut marker = MarkerImage {
            width: gray.width() as usize,
            height: gray.height() as usize,
            data: gray.into_raw(),
            filename: filename.to_string(),
        };

        let sharpness = marker.sharpness();
        if sharpness < cfg.min_sharpness {
            return Err(PipelineError::TooBlurry {
                sharpness,
                min_sharpness: cfg.min_sharpness,
            });
        }

        if cfg.apply_clahe {
            marker.data = ImagePreprocessing::apply_clahe(&marker.data, marker.width, marker.height);
        }

        Ok(marker)
    }

    /// Variance of the Laplacian response; low values indicate blur
    pub fn sharpness(&self) -> f64 {
        if self.width < 3 || self.height < 3 {
            return 0.0;
        }

        let w = self.width;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut count = 0u64;

        for y in 1..self.height - 1 {
            for x in 1..w - 1 {
                let center = self.data[y * w + x] as f64;
                let lap = 4.0 * center
                    - self.data[(y - 1) * w + x] as f64
                    - self.data[(y + 1) * w + x] as f64
                    - self.data[y * w + x - 1] as f64
                    - self.data[y * w + x + 1] as f64;
                sum += lap;
                sum_sq += lap * lap;
                count += 1;
            }
        }

        let mean = sum / count as f64;
        sum_sq / count as f64 - mean * mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat};
    use std::io::Cursor;

    fn png_bytes(img: GrayImage) -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn checkerboard(size: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                image::Luma([255u8])
            } else {
                image::Luma([0u8])
            }
        })
    }

    #[test]
    fn sniff_accepts_png_rejects_garbage() {
        let bytes = png_bytes(checkerboard(64, 8));
        assert!(payload_looks_like_image(&bytes));
        assert!(!payload_looks_like_image(b"definitely not an image"));
    }

    #[test]
    fn prepare_rejects_tiny_marker() {
        let cfg = ServiceConfig::default();
        let bytes = png_bytes(checkerboard(32, 4));
        let result = MarkerImage::prepare(&bytes, "tiny.png", &cfg);
        assert!(matches!(result, Err(PipelineError::MarkerTooSmall { .. })));
    }

    #[test]
    fn prepare_rejects_blurry_marker() {
        let cfg = ServiceConfig::default();
        let flat = GrayImage::from_pixel(128, 128, image::Luma([128u8]));
        let result = MarkerImage::prepare(&png_bytes(flat), "flat.png", &cfg);
        assert!(matches!(result, Err(PipelineError::TooBlurry { .. })));
    }

    #[test]
    fn prepare_downscales_oversized_marker() {
        let cfg = ServiceConfig::default();
        let bytes = png_bytes(checkerboard(1024, 32));
        let marker = MarkerImage::prepare(&bytes, "big.png", &cfg).unwrap();
        assert!(marker.width.max(marker.height) <= cfg.max_marker_edge as usize);
        assert_eq!(marker.data.len(), marker.width * marker.height);
    }

    #[test]
    fn prepare_keeps_small_marker_dimensions() {
        let cfg = ServiceConfig::default();
        let bytes = png_bytes(checkerboard(128, 16));
        let marker = MarkerImage::prepare(&bytes, "ok.png", &cfg).unwrap();
        assert_eq!((marker.width, marker.height), (128, 128));
    }

    #[test]
    fn prepare_rejects_corrupt_payload() {
        let cfg = ServiceConfig::default();
        // Valid PNG signature followed by garbage
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        let result = MarkerImage::prepare(&bytes, "corrupt.png", &cfg);
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }

    #[test]
    fn checkerboard_is_sharper_than_flat() {
        let cfg = ServiceConfig {
            apply_clahe: false,
            ..ServiceConfig::default()
        };
        let sharp = MarkerImage::prepare(&png_bytes(checkerboard(128, 16)), "a.png", &cfg).unwrap();
        assert!(sharp.sharpness() > cfg.min_sharpness);
    }
}

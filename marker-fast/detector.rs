use marker_core::{ExtractorConfig, Image};

use crate::corner::CornerDetector;
use crate::error::{DetectError, DetectResult};
use crate::refine::KeypointRefinement;
use crate::types::ScoredKeypoint;

/// FAST corner detector for a single pyramid level.
///
/// Runs the full per-level chain: segment-test corners, intensity-centroid
/// orientation, non-maximum suppression, a strongest-first cap and subpixel
/// refinement. Levels too small to detect on simply produce no keypoints.
pub struct FastDetector {
    cfg: ExtractorConfig,
    w: usize,
    h: usize,
}

impl FastDetector {
    /// Creates a new FAST detector with validation
    pub fn new(cfg: ExtractorConfig, width: usize, height: usize) -> DetectResult<Self> {
        if width == 0 || height == 0 {
            return Err(DetectError::InvalidImageSize { width, height });
        }

        // Zero would detect everything, >127 breaks u8 arithmetic
        if cfg.threshold == 0 || cfg.threshold > 127 {
            return Err(DetectError::InvalidThreshold(cfg.threshold));
        }

        // Orientation patches need a center pixel
        if cfg.patch_size % 2 == 0 {
            return Err(DetectError::InvalidPatchSize(cfg.patch_size));
        }

        Ok(Self { cfg, w: width, h: height })
    }

    /// Validates image data before processing
    fn validate_image(&self, img: &Image) -> DetectResult<()> {
        let expected_len = self.w * self.h;
        if img.len() != expected_len {
            return Err(DetectError::InvalidImageData {
                expected_len,
                actual_len: img.len(),
            });
        }
        Ok(())
    }

    /// Detect refined, suppressed keypoints with response scores
    pub fn detect(&self, img: &Image) -> DetectResult<Vec<ScoredKeypoint>> {
        self.validate_image(img)?;

        let mut keypoints = CornerDetector::detect(img, self.w, self.h, self.cfg.threshold);

        for kp in keypoints.iter_mut() {
            kp.keypoint.angle = KeypointRefinement::compute_orientation(
                img,
                self.w,
                self.h,
                kp.keypoint.x,
                kp.keypoint.y,
                self.cfg.patch_size,
            );
        }

        let suppressed = KeypointRefinement::non_maximum_suppression(&keypoints, self.cfg.nms_distance);
        let capped = KeypointRefinement::retain_strongest(suppressed, self.cfg.max_keypoints_per_level);

        Ok(capped
            .into_iter()
            .map(|sk| ScoredKeypoint {
                keypoint: KeypointRefinement::refine_keypoint_subpixel(img, self.w, self.h, sk.keypoint),
                response: sk.response,
            })
            .collect())
    }

    /// Get detector configuration
    pub fn config(&self) -> &ExtractorConfig {
        &self.cfg
    }

    /// Get image dimensions
    pub fn dimensions(&self) -> (usize, usize) {
        (self.w, self.h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ExtractorConfig {
        ExtractorConfig {
            threshold: 20,
            patch_size: 5,
            nms_distance: 3.0,
            max_keypoints_per_level: 0,
            n_threads: 1,
        }
    }

    fn corner_image(width: usize, height: usize) -> Image {
        let mut img = vec![50u8; width * height];
        let cx = width / 2;
        let cy = height / 2;
        for dy in -2i32..=2 {
            for dx in -2i32..=2 {
                let x = (cx as i32 + dx) as usize;
                let y = (cy as i32 + dy) as usize;
                img[y * width + x] = 255;
            }
        }
        img
    }

    #[test]
    fn valid_constructor() {
        assert!(FastDetector::new(test_config(), 100, 100).is_ok());
    }

    #[test]
    fn invalid_dimensions() {
        assert!(matches!(
            FastDetector::new(test_config(), 0, 100),
            Err(DetectError::InvalidImageSize { .. })
        ));
        assert!(matches!(
            FastDetector::new(test_config(), 100, 0),
            Err(DetectError::InvalidImageSize { .. })
        ));
    }

    #[test]
    fn invalid_threshold() {
        let mut cfg = test_config();
        cfg.threshold = 0;
        assert!(matches!(
            FastDetector::new(cfg.clone(), 100, 100),
            Err(DetectError::InvalidThreshold(0))
        ));

        cfg.threshold = 200;
        assert!(matches!(
            FastDetector::new(cfg, 100, 100),
            Err(DetectError::InvalidThreshold(200))
        ));
    }

    #[test]
    fn invalid_patch_size() {
        let mut cfg = test_config();
        cfg.patch_size = 16;
        assert!(matches!(
            FastDetector::new(cfg, 100, 100),
            Err(DetectError::InvalidPatchSize(16))
        ));
    }

    #[test]
    fn invalid_image_data() {
        let detector = FastDetector::new(test_config(), 10, 10).unwrap();
        let img = vec![0u8; 50];
        assert!(matches!(
            detector.detect(&img),
            Err(DetectError::InvalidImageData { .. })
        ));
    }

    #[test]
    fn uniform_image_detects_nothing() {
        let detector = FastDetector::new(test_config(), 20, 20).unwrap();
        let img = vec![128u8; 20 * 20];
        assert!(detector.detect(&img).unwrap().is_empty());
    }

    #[test]
    fn corner_image_detects_keypoints() {
        let detector = FastDetector::new(test_config(), 20, 20).unwrap();
        let keypoints = detector.detect(&corner_image(20, 20)).unwrap();
        assert!(!keypoints.is_empty());
        for kp in &keypoints {
            assert!(kp.keypoint.angle.is_finite());
            assert!(kp.response > 0.0);
        }
    }

    #[test]
    fn tiny_level_detects_nothing() {
        let detector = FastDetector::new(test_config(), 5, 5).unwrap();
        let img = vec![128u8; 25];
        assert!(detector.detect(&img).unwrap().is_empty());
    }

    #[test]
    fn per_level_cap_is_applied() {
        let mut cfg = test_config();
        cfg.max_keypoints_per_level = 1;
        let detector = FastDetector::new(cfg, 50, 50).unwrap();

        let mut img = vec![50u8; 50 * 50];
        for &(cx, cy) in &[(12usize, 12usize), (38, 12), (25, 38)] {
            for dy in -2i32..=2 {
                for dx in -2i32..=2 {
                    let x = (cx as i32 + dx) as usize;
                    let y = (cy as i32 + dy) as usize;
                    img[y * 50 + x] = 255;
                }
            }
        }

        let keypoints = detector.detect(&img).unwrap();
        assert_eq!(keypoints.len(), 1);
    }
}

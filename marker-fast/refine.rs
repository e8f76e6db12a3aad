use marker_core::{Image, Keypoint};

use crate::types::ScoredKeypoint;

/// Subpixel refinement, orientation and suppression of raw corners
pub struct KeypointRefinement;

impl KeypointRefinement {
    /// Refine keypoint to subpixel accuracy using quadratic surface fitting
    pub fn refine_keypoint_subpixel(img: &Image, width: usize, height: usize, kp: Keypoint) -> Keypoint {
        let x = kp.x as usize;
        let y = kp.y as usize;

        // Need a full 3x3 neighbourhood around the corner
        if x < 1 || y < 1 || x >= width - 1 || y >= height - 1 {
            return kp;
        }

        let samples = [
            [Self::sample_safe(img, width, height, x - 1, y - 1), Self::sample_safe(img, width, height, x, y - 1), Self::sample_safe(img, width, height, x + 1, y - 1)],
            [Self::sample_safe(img, width, height, x - 1, y), Self::sample_safe(img, width, height, x, y), Self::sample_safe(img, width, height, x + 1, y)],
            [Self::sample_safe(img, width, height, x - 1, y + 1), Self::sample_safe(img, width, height, x, y + 1), Self::sample_safe(img, width, height, x + 1, y + 1)],
        ];

        // Finite differences of the local quadratic surface
        let dx = (samples[1][2] - samples[1][0]) / 2.0;
        let dy = (samples[2][1] - samples[0][1]) / 2.0;
        let dxx = samples[1][2] - 2.0 * samples[1][1] + samples[1][0];
        let dyy = samples[2][1] - 2.0 * samples[1][1] + samples[0][1];
        let dxy = (samples[2][2] - samples[2][0] - samples[0][2] + samples[0][0]) / 4.0;

        let det = dxx * dyy - dxy * dxy;
        if det.abs() < 1e-6 {
            // Degenerate surface, keep the integer location
            return kp;
        }

        let offset_x = (-(dyy * dx - dxy * dy) / det).clamp(-0.5, 0.5);
        let offset_y = (-(dxx * dy - dxy * dx) / det).clamp(-0.5, 0.5);

        Keypoint {
            x: kp.x + offset_x,
            y: kp.y + offset_y,
            angle: kp.angle,
        }
    }

    /// Safe image sampling with bounds checking
    fn sample_safe(img: &Image, width: usize, height: usize, x: usize, y: usize) -> f32 {
        if x < width && y < height && y * width + x < img.len() {
            img[y * width + x] as f32
        } else {
            0.0
        }
    }

    /// Compute orientation for keypoint using the intensity centroid method.
    ///
    /// Returns 0 when the patch does not fit inside the image.
    pub fn compute_orientation(img: &Image, width: usize, height: usize, x: f32, y: f32, patch_size: usize) -> f32 {
        let half = (patch_size / 2) as i32;
        let (cx, cy) = (x as i32, y as i32);

        if cx - half < 0 || cy - half < 0 || cx + half >= width as i32 || cy + half >= height as i32 {
            return 0.0;
        }

        let mut m10 = 0i64;
        let mut m01 = 0i64;
        for dy in -half..=half {
            let yy = (cy + dy) as usize;
            for dx in -half..=half {
                let xx = (cx + dx) as usize;
                let val = img[yy * width + xx] as i64;
                m10 += dx as i64 * val;
                m01 += dy as i64 * val;
            }
        }

        if m10 == 0 && m01 == 0 {
            0.0
        } else {
            (m01 as f32).atan2(m10 as f32)
        }
    }

    /// Non-maximum suppression to reduce duplicate keypoints
    pub fn non_maximum_suppression(keypoints: &[ScoredKeypoint], min_distance: f32) -> Vec<ScoredKeypoint> {
        if keypoints.is_empty() {
            return Vec::new();
        }

        let mut sorted_keypoints = keypoints.to_vec();
        sorted_keypoints.sort_by(|a, b| b.response.partial_cmp(&a.response).unwrap_or(std::cmp::Ordering::Equal));

        let mut suppressed: Vec<ScoredKeypoint> = Vec::new();
        let min_distance_sq = min_distance * min_distance;

        for candidate in sorted_keypoints {
            let mut is_local_max = true;

            for existing in &suppressed {
                let dx = candidate.keypoint.x - existing.keypoint.x;
                let dy = candidate.keypoint.y - existing.keypoint.y;
                if dx * dx + dy * dy < min_distance_sq {
                    is_local_max = false;
                    break;
                }
            }

            if is_local_max {
                suppressed.push(candidate);
            }
        }

        suppressed
    }

    /// Keep at most `cap` keypoints, strongest first. A cap of 0 keeps all.
    pub fn retain_strongest(mut keypoints: Vec<ScoredKeypoint>, cap: usize) -> Vec<ScoredKeypoint> {
        if cap == 0 || keypoints.len() <= cap {
            return keypoints;
        }
        keypoints.sort_by(|a, b| b.response.partial_cmp(&a.response).unwrap_or(std::cmp::Ordering::Equal));
        keypoints.truncate(cap);
        keypoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kp(x: f32, y: f32, response: f32) -> ScoredKeypoint {
        ScoredKeypoint {
            keypoint: Keypoint { x, y, angle: 0.0 },
            response,
        }
    }

    #[test]
    fn nms_enforces_minimum_distance() {
        let keypoints = vec![kp(10.0, 10.0, 5.0), kp(11.0, 10.0, 3.0), kp(30.0, 30.0, 4.0)];
        let suppressed = KeypointRefinement::non_maximum_suppression(&keypoints, 5.0);

        assert_eq!(suppressed.len(), 2);
        for i in 0..suppressed.len() {
            for j in (i + 1)..suppressed.len() {
                let dx = suppressed[i].keypoint.x - suppressed[j].keypoint.x;
                let dy = suppressed[i].keypoint.y - suppressed[j].keypoint.y;
                assert!((dx * dx + dy * dy).sqrt() >= 5.0);
            }
        }
    }

    #[test]
    fn nms_prefers_strongest() {
        let keypoints = vec![kp(10.0, 10.0, 1.0), kp(11.0, 10.0, 9.0)];
        let suppressed = KeypointRefinement::non_maximum_suppression(&keypoints, 5.0);
        assert_eq!(suppressed.len(), 1);
        assert_eq!(suppressed[0].response, 9.0);
    }

    #[test]
    fn retain_strongest_caps_by_response() {
        let keypoints = vec![kp(1.0, 1.0, 1.0), kp(2.0, 2.0, 3.0), kp(3.0, 3.0, 2.0)];
        let capped = KeypointRefinement::retain_strongest(keypoints.clone(), 2);
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].response, 3.0);
        assert_eq!(capped[1].response, 2.0);

        assert_eq!(KeypointRefinement::retain_strongest(keypoints, 0).len(), 3);
    }

    #[test]
    fn orientation_points_toward_bright_side() {
        let width = 21;
        let height = 21;
        let mut img = vec![0u8; width * height];
        // Brighter on the right half
        for y in 0..height {
            for x in 11..width {
                img[y * width + x] = 200;
            }
        }
        let angle = KeypointRefinement::compute_orientation(&img, width, height, 10.0, 10.0, 15);
        assert!(angle.abs() < 0.2, "expected angle near 0, got {}", angle);
    }

    #[test]
    fn orientation_at_border_is_zero() {
        let img = vec![128u8; 20 * 20];
        assert_eq!(KeypointRefinement::compute_orientation(&img, 20, 20, 1.0, 1.0, 15), 0.0);
    }

    #[test]
    fn subpixel_refinement_stays_near_corner() {
        let width = 20;
        let height = 20;
        let mut img = vec![0u8; width * height];
        img[10 * width + 10] = 255;

        let refined = KeypointRefinement::refine_keypoint_subpixel(
            &img,
            width,
            height,
            Keypoint { x: 10.0, y: 10.0, angle: 0.0 },
        );
        assert!((refined.x - 10.0).abs() <= 0.5);
        assert!((refined.y - 10.0).abs() <= 0.5);
    }

    #[test]
    fn subpixel_refinement_skips_border_points() {
        let img = vec![128u8; 10 * 10];
        let original = Keypoint { x: 0.0, y: 0.0, angle: 0.5 };
        let refined = KeypointRefinement::refine_keypoint_subpixel(&img, 10, 10, original);
        assert_eq!(refined, original);
    }
}

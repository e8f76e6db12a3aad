use marker_core::{Image, Keypoint};
use rayon::prelude::*;

use crate::types::ScoredKeypoint;

/// Minimum contiguous arc length for the FAST segment test
const FAST_ARC_LEN: usize = 9;

/// FAST segment-test corner detection
pub struct CornerDetector;

impl CornerDetector {
    /// FAST circle offsets for corner detection
    pub const FAST_OFFSETS: [(i32, i32); 16] = [
        (0, -3), (1, -3), (2, -2), (3, -1),
        (3, 0), (3, 1), (2, 2), (1, 3),
        (0, 3), (-1, 3), (-2, 2), (-3, 1),
        (-3, 0), (-3, -1), (-2, -2), (-1, -3),
    ];

    /// Detect FAST-9 corners with response scores.
    ///
    /// Images too small to hold the 3-pixel detection border simply yield
    /// no keypoints. Orientation angles are left at 0 for the refinement
    /// stage to fill in.
    pub fn detect(img: &Image, width: usize, height: usize, threshold: u8) -> Vec<ScoredKeypoint> {
        if width < 7 || height < 7 {
            return Vec::new();
        }

        let rows = 3..height - 3;
        rows.into_par_iter()
            .flat_map_iter(|y| {
                let mut row_keypoints = Vec::new();
                for x in 3..width - 3 {
                    let center = img[y * width + x];

                    let mut brighter: u16 = 0;
                    let mut darker: u16 = 0;
                    for (i, &(dx, dy)) in Self::FAST_OFFSETS.iter().enumerate() {
                        let px = (x as i32 + dx) as usize;
                        let py = (y as i32 + dy) as usize;
                        let pixel = img[py * width + px];

                        if pixel >= center.saturating_add(threshold) {
                            brighter |= 1 << i;
                        } else if pixel.saturating_add(threshold) <= center {
                            darker |= 1 << i;
                        }
                    }

                    if has_contiguous_arc(brighter, FAST_ARC_LEN)
                        || has_contiguous_arc(darker, FAST_ARC_LEN)
                    {
                        let response = Self::intensity_response(img, width, x, y, center, threshold);
                        row_keypoints.push(ScoredKeypoint {
                            keypoint: Keypoint {
                                x: x as f32,
                                y: y as f32,
                                angle: 0.0,
                            },
                            response,
                        });
                    }
                }
                row_keypoints
            })
            .collect()
    }

    /// Mean squared intensity difference over circle pixels beyond threshold
    fn intensity_response(img: &Image, width: usize, x: usize, y: usize, center: u8, threshold: u8) -> f32 {
        let center_f32 = center as f32;
        let mut sum_diff = 0.0f32;
        let mut count = 0u32;

        for &(dx, dy) in Self::FAST_OFFSETS.iter() {
            let px = (x as i32 + dx) as usize;
            let py = (y as i32 + dy) as usize;
            let pixel = img[py * width + px] as f32;
            let diff = (center_f32 - pixel).abs();
            if diff > threshold as f32 {
                sum_diff += diff * diff;
                count += 1;
            }
        }

        if count > 0 {
            sum_diff / count as f32
        } else {
            0.0
        }
    }
}

/// Check for `min_count` consecutive set bits in a circular 16-bit mask.
///
/// For a run of length n the mask ANDed with its first n-1 circular
/// rotations must stay non-zero.
fn has_contiguous_arc(mask: u16, min_count: usize) -> bool {
    if mask == 0 || min_count == 0 || min_count > 16 {
        return false;
    }

    let mut test_mask = mask;
    for i in 1..min_count {
        let rotated = (mask << i) | (mask >> (16 - i));
        test_mask &= rotated;
        if test_mask == 0 {
            return false;
        }
    }
    test_mask != 0
}

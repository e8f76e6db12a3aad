use marker_core::{Descriptor, Image, Keypoint, DESCRIPTOR_LEN};
use rayon::prelude::*;

const NUM_PAIRS: usize = DESCRIPTOR_LEN * 8;
/// Sampling offsets stay within this radius of the keypoint
const PAIR_RADIUS: i32 = 12;
/// Seed for the pair table; changing it changes every descriptor,
/// so it is part of the compiled-file format contract.
const PAIR_SEED: u32 = 0x9E37_79B9;

pub struct BriefGenerator {
    w: usize,
    h: usize,
    pairs: Vec<(i32, i32, i32, i32)>,
}

impl BriefGenerator {
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0);
        Self {
            w: width,
            h: height,
            pairs: build_pair_table(),
        }
    }

    /// One 256-bit descriptor per keypoint, steered by the keypoint angle
    pub fn generate_descriptors(&self, img: &Image, kps: &[Keypoint]) -> Vec<Descriptor> {
        kps.par_iter()
            .map(|kp| {
                let (s, c) = kp.angle.sin_cos();
                let (cx, cy) = (kp.x, kp.y);
                let mut d = [0u8; DESCRIPTOR_LEN];

                for (i, &(dx1, dy1, dx2, dy2)) in self.pairs.iter().enumerate() {
                    // Rotate the test pair into the keypoint frame
                    let (rx1, ry1) = (
                        cx + c * dx1 as f32 - s * dy1 as f32,
                        cy + s * dx1 as f32 + c * dy1 as f32,
                    );
                    let (rx2, ry2) = (
                        cx + c * dx2 as f32 - s * dy2 as f32,
                        cy + s * dx2 as f32 + c * dy2 as f32,
                    );

                    let val1 = self.bilinear_sample(img, rx1, ry1);
                    let val2 = self.bilinear_sample(img, rx2, ry2);

                    let bit = (val1 < val2) as u8;
                    d[i / 8] |= bit << (i % 8);
                }
                d
            })
            .collect()
    }

    /// Bilinear interpolation for subpixel sampling
    fn bilinear_sample(&self, img: &Image, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let x1 = x0 + 1.0;
        let y1 = y0 + 1.0;

        if x0 < 0.0 || y0 < 0.0 || x1 >= self.w as f32 || y1 >= self.h as f32 {
            // Clamp to image bounds for boundary samples
            let cx = x.round().clamp(0.0, (self.w - 1) as f32) as usize;
            let cy = y.round().clamp(0.0, (self.h - 1) as f32) as usize;
            return img[cy * self.w + cx] as f32;
        }

        let dx = x - x0;
        let dy = y - y0;

        let x0_idx = x0 as usize;
        let y0_idx = y0 as usize;
        let x1_idx = (x1 as usize).min(self.w - 1);
        let y1_idx = (y1 as usize).min(self.h - 1);

        let p00 = img[y0_idx * self.w + x0_idx] as f32;
        let p10 = img[y0_idx * self.w + x1_idx] as f32;
        let p01 = img[y1_idx * self.w + x0_idx] as f32;
        let p11 = img[y1_idx * self.w + x1_idx] as f32;

        let top = p00 * (1.0 - dx) + p10 * dx;
        let bottom = p01 * (1.0 - dx) + p11 * dx;

        top * (1.0 - dy) + bottom * dy
    }
}

/// Fixed pseudo-random test pairs, identical for every generator instance.
///
/// Pairs with coincident endpoints would always compare equal, so they are
/// skipped.
fn build_pair_table() -> Vec<(i32, i32, i32, i32)> {
    let span = (2 * PAIR_RADIUS + 1) as u32;
    let mut state = PAIR_SEED;
    let mut next_offset = move || {
        // xorshift32
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state % span) as i32 - PAIR_RADIUS
    };

    let mut pairs = Vec::with_capacity(NUM_PAIRS);
    while pairs.len() < NUM_PAIRS {
        let pair = (next_offset(), next_offset(), next_offset(), next_offset());
        if (pair.0, pair.1) == (pair.2, pair.3) {
            continue;
        }
        pairs.push(pair);
    }
    pairs
}

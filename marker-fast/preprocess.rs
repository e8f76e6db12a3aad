use marker_core::Image;

/// Contrast enhancement applied to markers before extraction
pub struct ImagePreprocessing;

impl ImagePreprocessing {
    /// Apply CLAHE (Contrast Limited Adaptive Histogram Equalization)
    pub fn apply_clahe(img: &Image, width: usize, height: usize) -> Image {
        let tile_size = 8;
        let clip_limit = 2.0;

        let tiles_x = width.div_ceil(tile_size);
        let tiles_y = height.div_ceil(tile_size);

        let histograms = Self::compute_tile_histograms(img, width, height, tile_size, tiles_x, tiles_y);
        let limited = Self::apply_contrast_limiting(&histograms, clip_limit);
        let tile_cdfs = Self::compute_tile_cdfs(&limited);

        Self::apply_adaptive_equalization(img, width, height, &tile_cdfs, tile_size, tiles_x, tiles_y)
    }

    /// Compute histograms for each tile
    fn compute_tile_histograms(
        img: &Image,
        width: usize,
        height: usize,
        tile_size: usize,
        tiles_x: usize,
        tiles_y: usize,
    ) -> Vec<Vec<u32>> {
        let mut histograms = Vec::with_capacity(tiles_x * tiles_y);

        for tile_y in 0..tiles_y {
            for tile_x in 0..tiles_x {
                let mut histogram = vec![0u32; 256];

                let start_x = tile_x * tile_size;
                let end_x = ((tile_x + 1) * tile_size).min(width);
                let start_y = tile_y * tile_size;
                let end_y = ((tile_y + 1) * tile_size).min(height);

                for y in start_y..end_y {
                    for x in start_x..end_x {
                        let pixel = img[y * width + x] as usize;
                        histogram[pixel] += 1;
                    }
                }

                histograms.push(histogram);
            }
        }

        histograms
    }

    /// Clip histograms and redistribute the excess uniformly
    fn apply_contrast_limiting(histograms: &[Vec<u32>], clip_limit: f32) -> Vec<Vec<u32>> {
        histograms.iter().map(|histogram| {
            let total_pixels: u32 = histogram.iter().sum();
            let avg_height = total_pixels as f32 / 256.0;
            // Small tiles give a fractional average; never clip to zero
            let clip_threshold = ((avg_height * clip_limit) as u32).max(1);

            let mut limited = histogram.clone();
            let mut excess = 0u32;

            for count in limited.iter_mut() {
                if *count > clip_threshold {
                    excess += *count - clip_threshold;
                    *count = clip_threshold;
                }
            }

            let redistribution = excess / 256;
            let remainder = excess % 256;

            for (i, count) in limited.iter_mut().enumerate() {
                *count += redistribution;
                if i < remainder as usize {
                    *count += 1;
                }
            }

            limited
        }).collect()
    }

    /// Compute cumulative distribution functions for tiles
    fn compute_tile_cdfs(histograms: &[Vec<u32>]) -> Vec<Vec<f32>> {
        histograms.iter().map(|histogram| {
            let total_pixels: u32 = histogram.iter().sum();

            if total_pixels == 0 {
                return vec![0.0; 256];
            }

            let mut cdf = Vec::with_capacity(256);
            let mut cumulative = 0u32;

            for &count in histogram {
                cumulative += count;
                cdf.push((cumulative as f32 / total_pixels as f32) * 255.0);
            }

            cdf
        }).collect()
    }

    /// Remap pixels through their tile's CDF
    fn apply_adaptive_equalization(
        img: &Image,
        width: usize,
        height: usize,
        tile_cdfs: &[Vec<f32>],
        tile_size: usize,
        tiles_x: usize,
        tiles_y: usize,
    ) -> Image {
        let mut equalized = vec![0u8; img.len()];

        for y in 0..height {
            for x in 0..width {
                let pixel = img[y * width + x];

                let tile_x = (x / tile_size).min(tiles_x - 1);
                let tile_y = (y / tile_size).min(tiles_y - 1);
                let tile_idx = tile_y * tiles_x + tile_x;

                equalized[y * width + x] = tile_cdfs[tile_idx][pixel as usize].clamp(0.0, 255.0) as u8;
            }
        }

        equalized
    }
}

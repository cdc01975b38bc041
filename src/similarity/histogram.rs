//! Per-channel color histograms
//!
//! Used to tell recolors apart from near-duplicates: two textures can sit
//! close together in embedding space while their palettes differ.

use std::path::Path;

use image::RgbImage;

use crate::error::{Result, SimilarityError};

/// Source of decoded pixel data for an external id
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<RgbImage>;
}

/// Decodes images from the filesystem; alpha is discarded
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageDecoder;

impl ImageDecoder for FileImageDecoder {
    fn decode(&self, path: &Path) -> Result<RgbImage> {
        let image = image::open(path).map_err(|source| SimilarityError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(image.to_rgb8())
    }
}

/// R, G and B histograms of equal-width buckets, each summing to 1
#[derive(Debug, Clone, PartialEq)]
pub struct ColorHistogram {
    bins: usize,
    /// `3 * bins` entries: red, then green, then blue
    values: Vec<f32>,
}

impl ColorHistogram {
    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn channel(&self, channel: usize) -> &[f32] {
        &self.values[channel * self.bins..(channel + 1) * self.bins]
    }

    /// Mean per-channel total-variation distance, in `[0, 1]`
    pub fn distance(&self, other: &ColorHistogram) -> f32 {
        histogram_distance(&self.values, &other.values)
    }
}

/// Histogram of `image` with `bins` buckets per channel (clamped to 1..=256)
pub fn color_histogram(image: &RgbImage, bins: usize) -> ColorHistogram {
    let bins = bins.clamp(1, 256);
    let mut counts = vec![0u64; 3 * bins];

    for pixel in image.pixels() {
        for (channel, &value) in pixel.0.iter().enumerate() {
            // bucket b covers [256 * b / bins, 256 * (b + 1) / bins)
            let bucket = value as usize * bins / 256;
            counts[channel * bins + bucket] += 1;
        }
    }

    let total = (image.width() as u64 * image.height() as u64).max(1) as f32;
    ColorHistogram {
        bins,
        values: counts.into_iter().map(|c| c as f32 / total).collect(),
    }
}

/// `sum |a_i - b_i| / 6` over concatenated RGB histograms
pub fn histogram_distance(a: &[f32], b: &[f32]) -> f32 {
    let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    (sum / 6.0).clamp(0.0, 1.0)
}

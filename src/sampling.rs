//! Background color estimation from flat image regions.
//!
//! Each sampled region contributes its mean color and internal spread. An
//! [`OutlierRejectingAggregator`] drops regions that are not flat (the subject
//! reaches into them) or that disagree with the majority, then averages the rest.

use image::{Rgb, RgbaImage};

use crate::config::SamplerConfig;
use crate::error::{Error, Result};

/// Summary statistics of one sampled region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorSample {
    /// Mean RGB value.
    pub mean: [f32; 3],
    /// Largest per-channel standard deviation inside the region.
    pub stddev: f32,
}

impl ColorSample {
    /// Compute mean and spread of a rectangular region.
    ///
    /// The region must lie inside the image and be non-empty.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_region(img: &RgbaImage, x: u32, y: u32, w: u32, h: u32) -> Self {
        let mut sum = [0.0_f64; 3];
        let mut sum_sq = [0.0_f64; 3];
        for dy in 0..h {
            for dx in 0..w {
                let px = img.get_pixel(x + dx, y + dy);
                for ch in 0..3 {
                    let v = f64::from(px[ch]);
                    sum[ch] += v;
                    sum_sq[ch] += v * v;
                }
            }
        }

        let n = f64::from(w) * f64::from(h);
        let mut mean = [0.0_f32; 3];
        let mut max_var = 0.0_f64;
        for ch in 0..3 {
            let m = sum[ch] / n;
            let var = (sum_sq[ch] / n - m * m).max(0.0);
            max_var = max_var.max(var);
            mean[ch] = m as f32;
        }

        Self {
            mean,
            stddev: max_var.sqrt() as f32,
        }
    }

    fn distance(&self, other: &Self) -> f32 {
        self.mean
            .iter()
            .zip(other.mean.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Result of aggregating the accepted samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    /// Mean color of the accepted samples.
    pub mean: [f32; 3],
    /// Per-channel `max - min` among accepted sample means.
    pub spread: [f32; 3],
    /// Number of samples kept.
    pub accepted: usize,
    /// Number of samples dropped.
    pub rejected: usize,
}

/// Robust mean: reject non-flat samples, keep the largest agreeing group, average it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierRejectingAggregator {
    /// Samples with a larger internal spread are rejected.
    pub max_stddev: f32,
    /// Samples farther than this from the consensus anchor are rejected.
    pub max_consensus_distance: f32,
}

impl OutlierRejectingAggregator {
    /// Build from sampler settings.
    #[must_use]
    pub fn from_config(config: &SamplerConfig) -> Self {
        Self {
            max_stddev: config.max_patch_stddev,
            max_consensus_distance: config.max_consensus_distance,
        }
    }

    /// Aggregate samples, or `None` if every sample was rejected.
    #[must_use]
    pub fn aggregate(&self, samples: &[ColorSample]) -> Option<Aggregate> {
        let flat: Vec<&ColorSample> = samples
            .iter()
            .filter(|s| s.stddev <= self.max_stddev)
            .collect();

        // Anchor on the flat sample with the most neighbours; ties go to the earliest.
        let anchor = flat
            .iter()
            .enumerate()
            .max_by_key(|(i, candidate)| {
                let votes = flat
                    .iter()
                    .filter(|other| candidate.distance(other) <= self.max_consensus_distance)
                    .count();
                (votes, std::cmp::Reverse(*i))
            })
            .map(|(_, s)| *s)?;

        let accepted: Vec<&ColorSample> = flat
            .into_iter()
            .filter(|s| anchor.distance(s) <= self.max_consensus_distance)
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let n = accepted.len() as f32;
        let mut mean = [0.0_f32; 3];
        let mut spread = [0.0_f32; 3];
        for ch in 0..3 {
            let values = accepted.iter().map(|s| s.mean[ch]);
            mean[ch] = values.clone().sum::<f32>() / n;
            let lo = values.clone().fold(f32::INFINITY, f32::min);
            let hi = values.fold(f32::NEG_INFINITY, f32::max);
            spread[ch] = hi - lo;
        }

        Some(Aggregate {
            mean,
            spread,
            accepted: accepted.len(),
            rejected: samples.len() - accepted.len(),
        })
    }
}

/// Estimated flat background of one particular image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundEstimate {
    /// Estimated background color.
    pub color: Rgb<u8>,
    /// Per-channel tolerance, never negative.
    pub tolerance: [f32; 3],
    /// Dimensions of the image the estimate was taken from.
    pub source_dimensions: (u32, u32),
}

impl BackgroundEstimate {
    /// An exact, caller-supplied background with zero tolerance.
    #[must_use]
    pub fn exact(color: Rgb<u8>, source_dimensions: (u32, u32)) -> Self {
        Self {
            color,
            tolerance: [0.0; 3],
            source_dimensions,
        }
    }

    /// Euclidean length of the tolerance vector, in RGB distance units.
    #[must_use]
    pub fn tolerance_magnitude(&self) -> f32 {
        self.tolerance.iter().map(|t| t * t).sum::<f32>().sqrt()
    }

    /// Whether this estimate was sampled from an image of the same size.
    #[must_use]
    pub fn applies_to(&self, img: &RgbaImage) -> bool {
        self.source_dimensions == img.dimensions()
    }
}

/// Corner patches of side `patch` (clamped to the image), clockwise from top-left.
fn corner_regions(width: u32, height: u32, patch: u32) -> [(u32, u32, u32, u32); 4] {
    let pw = patch.min(width);
    let ph = patch.min(height);
    let right = width - pw;
    let bottom = height - ph;
    [
        (0, 0, pw, ph),
        (right, 0, pw, ph),
        (right, bottom, pw, ph),
        (0, bottom, pw, ph),
    ]
}

/// Estimate the background color of `img` from its four corners.
///
/// # Errors
///
/// Returns [`Error::InvalidDimensions`] for an empty image and
/// [`Error::InsufficientBackgroundSample`] when every corner is rejected.
pub fn sample_background(img: &RgbaImage, config: &SamplerConfig) -> Result<BackgroundEstimate> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions { width, height });
    }

    let samples: Vec<ColorSample> = corner_regions(width, height, config.patch_size)
        .iter()
        .map(|&(x, y, w, h)| ColorSample::from_region(img, x, y, w, h))
        .collect();

    let aggregate = OutlierRejectingAggregator::from_config(config)
        .aggregate(&samples)
        .ok_or(Error::InsufficientBackgroundSample {
            rejected: samples.len(),
        })?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let color = Rgb(aggregate.mean.map(|v| v.round().clamp(0.0, 255.0) as u8));

    tracing::debug!(
        ?color,
        accepted = aggregate.accepted,
        rejected = aggregate.rejected,
        "sampled background"
    );

    Ok(BackgroundEstimate {
        color,
        tolerance: aggregate.spread.map(|s| s.max(0.0)),
        source_dimensions: (width, height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn flat(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    fn sample(mean: [f32; 3], stddev: f32) -> ColorSample {
        ColorSample { mean, stddev }
    }

    #[test]
    fn flat_image_yields_exact_color_and_zero_tolerance() {
        let img = flat(64, 64, [37, 40, 59]);
        let est = sample_background(&img, &SamplerConfig::default()).unwrap();
        assert_eq!(est.color, Rgb([37, 40, 59]));
        assert_eq!(est.tolerance, [0.0; 3]);
        assert!(est.applies_to(&img));
    }

    #[test]
    fn noisy_corner_is_rejected() {
        let mut img = flat(64, 64, [255, 255, 255]);
        // Checkerboard in the top-left corner simulates the subject touching it.
        for y in 0..8 {
            for x in 0..8 {
                if (x + y) % 2 == 0 {
                    img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
            }
        }
        let est = sample_background(&img, &SamplerConfig::default()).unwrap();
        assert_eq!(est.color, Rgb([255, 255, 255]));
    }

    #[test]
    fn all_corners_rejected_is_an_error() {
        let mut img = flat(16, 16, [255, 255, 255]);
        for (x, y, px) in img.enumerate_pixels_mut() {
            if (x + y) % 2 == 0 {
                *px = Rgba([0, 0, 0, 255]);
            }
        }
        let err = sample_background(&img, &SamplerConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBackgroundSample { rejected: 4 }
        ));
    }

    #[test]
    fn tiny_image_clamps_patch_size() {
        let img = flat(1, 1, [10, 20, 30]);
        let est = sample_background(&img, &SamplerConfig::default()).unwrap();
        assert_eq!(est.color, Rgb([10, 20, 30]));
    }

    #[test]
    fn aggregator_drops_flat_minority_color() {
        let agg = OutlierRejectingAggregator {
            max_stddev: 5.0,
            max_consensus_distance: 10.0,
        };
        let samples = [
            sample([250.0, 250.0, 250.0], 1.0),
            sample([254.0, 252.0, 250.0], 1.0),
            sample([40.0, 40.0, 40.0], 0.0),
            sample([252.0, 251.0, 250.0], 1.0),
        ];
        let result = agg.aggregate(&samples).unwrap();
        assert_eq!(result.accepted, 3);
        assert_eq!(result.rejected, 1);
        assert!((result.mean[0] - 252.0).abs() < 1e-4);
        assert_eq!(result.spread, [4.0, 2.0, 0.0]);
    }

    #[test]
    fn aggregator_returns_none_when_nothing_is_flat() {
        let agg = OutlierRejectingAggregator {
            max_stddev: 1.0,
            max_consensus_distance: 10.0,
        };
        assert!(agg.aggregate(&[sample([0.0; 3], 9.0)]).is_none());
        assert!(agg.aggregate(&[]).is_none());
    }
}

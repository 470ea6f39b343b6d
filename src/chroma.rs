//! Single-render chroma keying with a graduated alpha ramp.
//!
//! Alpha grows linearly with RGB distance to the background between a low and a
//! high threshold, so edges stay anti-aliased instead of jagged.

use image::{Rgb, Rgba, RgbaImage};

use crate::config::{ChromaKeyConfig, DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD};
use crate::matting::MatteResult;
use crate::sampling::BackgroundEstimate;

/// Resolved ramp bounds, always `low < high`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChromaThresholds {
    /// Distances at or below this are fully transparent.
    pub low: f32,
    /// Distances at or above this are fully opaque.
    pub high: f32,
}

impl ChromaThresholds {
    /// Fill unset thresholds from the background estimate.
    ///
    /// A noisier background (larger tolerance) shifts the whole ramp outward.
    #[must_use]
    pub fn resolve(config: &ChromaKeyConfig, estimate: &BackgroundEstimate) -> Self {
        let slack = estimate.tolerance_magnitude();
        let width = DEFAULT_HIGH_THRESHOLD - DEFAULT_LOW_THRESHOLD;

        let (low, high) = match (config.low_threshold, config.high_threshold) {
            (Some(low), Some(high)) => (low, high),
            (Some(low), None) => (low, low + width),
            (None, Some(high)) => {
                let low = DEFAULT_LOW_THRESHOLD + slack;
                if low < high {
                    (low, high)
                } else {
                    (high * DEFAULT_LOW_THRESHOLD / DEFAULT_HIGH_THRESHOLD, high)
                }
            }
            (None, None) => (
                DEFAULT_LOW_THRESHOLD + slack,
                DEFAULT_HIGH_THRESHOLD + slack,
            ),
        };

        // Configs built without validate() can still pass an inverted pair.
        let high = if high > low { high } else { low + 1.0 };
        Self { low, high }
    }

    /// Alpha in `[0, 1]` for a color distance.
    #[must_use]
    pub fn ramp(&self, distance: f32) -> f32 {
        ((distance - self.low) / (self.high - self.low)).clamp(0.0, 1.0)
    }
}

/// Euclidean RGB distance.
#[must_use]
pub fn color_distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (f32::from(x) - f32::from(y)).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Key out `background` from `img`.
///
/// Color channels pass through unchanged; any existing source alpha is
/// multiplied with the keyed alpha.
#[must_use]
pub fn chroma_key(img: &RgbaImage, background: Rgb<u8>, thresholds: ChromaThresholds) -> MatteResult {
    let mut out = RgbaImage::new(img.width(), img.height());
    for (dst, src) in out.pixels_mut().zip(img.pixels()) {
        let rgb = [src[0], src[1], src[2]];
        let keyed = thresholds.ramp(color_distance(rgb, background.0));
        let alpha = keyed * f32::from(src[3]);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let alpha = alpha.round().clamp(0.0, 255.0) as u8;
        *dst = Rgba([rgb[0], rgb[1], rgb[2], alpha]);
    }

    tracing::debug!(
        ?background,
        low = thresholds.low,
        high = thresholds.high,
        "chroma key applied"
    );

    MatteResult::new(out, Some(background))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(low: f32, high: f32) -> ChromaThresholds {
        ChromaThresholds { low, high }
    }

    #[test]
    fn uniform_background_becomes_fully_transparent() {
        let bg = Rgb([37, 40, 59]);
        let img = RgbaImage::from_pixel(20, 10, Rgba([37, 40, 59, 255]));
        let estimate = BackgroundEstimate::exact(bg, img.dimensions());
        let t = ChromaThresholds::resolve(&ChromaKeyConfig::default(), &estimate);
        let matte = chroma_key(&img, bg, t);
        assert!(matte.image().pixels().all(|p| p[3] == 0));
        assert_eq!(matte.background(), Some(bg));
    }

    #[test]
    fn ramp_is_graduated_between_thresholds() {
        let t = thresholds(15.0, 80.0);
        assert_eq!(t.ramp(0.0), 0.0);
        assert_eq!(t.ramp(15.0), 0.0);
        assert!((t.ramp(47.5) - 0.5).abs() < 1e-6);
        assert_eq!(t.ramp(80.0), 1.0);
        assert_eq!(t.ramp(400.0), 1.0);
    }

    #[test]
    fn colors_pass_through_and_far_pixels_are_opaque() {
        let mut img = RgbaImage::from_pixel(3, 1, Rgba([255, 255, 255, 255]));
        img.put_pixel(1, 0, Rgba([200, 10, 10, 255]));
        img.put_pixel(2, 0, Rgba([230, 230, 230, 255]));
        let matte = chroma_key(&img, Rgb([255, 255, 255]), thresholds(15.0, 80.0));
        let out = matte.image();

        assert_eq!(out.get_pixel(0, 0)[3], 0);
        assert_eq!(out.get_pixel(1, 0).0, [200, 10, 10, 255]);
        // distance sqrt(3 * 25^2) ~= 43.3 -> (43.3 - 15) / 65 ~= 0.435
        let edge = out.get_pixel(2, 0);
        assert_eq!(&edge.0[..3], &[230, 230, 230]);
        assert!((105..=117).contains(&edge[3]), "edge alpha {}", edge[3]);
    }

    #[test]
    fn source_alpha_limits_keyed_alpha() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        let matte = chroma_key(&img, Rgb([255, 255, 255]), thresholds(15.0, 80.0));
        assert_eq!(matte.alpha_at(0, 0), Some(128));
    }

    #[test]
    fn unset_thresholds_widen_with_background_tolerance() {
        let estimate = BackgroundEstimate {
            color: Rgb([250, 250, 250]),
            tolerance: [3.0, 4.0, 0.0],
            source_dimensions: (8, 8),
        };
        let t = ChromaThresholds::resolve(&ChromaKeyConfig::default(), &estimate);
        assert!((t.low - 20.0).abs() < 1e-5);
        assert!((t.high - 85.0).abs() < 1e-5);

        let explicit = ChromaKeyConfig {
            low_threshold: Some(5.0),
            high_threshold: None,
        };
        let t = ChromaThresholds::resolve(&explicit, &estimate);
        assert_eq!(t, thresholds(5.0, 70.0));
    }
}

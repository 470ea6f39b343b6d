//! Color decontamination of translucent edge pixels.
//!
//! A translucent pixel keyed against a flat background still carries that
//! background in its color: `observed = fg * a + background * (1 - a)`.
//! Solving for `fg` removes the halo that would otherwise show when the asset is
//! composited over a different background.

use image::{Rgb, RgbaImage};

/// Below this normalized alpha the division amplifies noise more than it helps.
const MIN_ALPHA: f32 = 0.01;

/// Remove `background` bleed from every pixel with `0 < alpha < 255`.
///
/// Opaque and fully transparent pixels are copied unchanged.
#[must_use]
pub fn decontaminate(img: &RgbaImage, background: Rgb<u8>) -> RgbaImage {
    let bg = background.0.map(f32::from);
    let mut out = img.clone();
    let mut touched = 0usize;

    for px in out.pixels_mut() {
        let alpha = px[3];
        if alpha == 0 || alpha == 255 {
            continue;
        }
        let a = f32::from(alpha) / 255.0;
        if a < MIN_ALPHA {
            continue;
        }
        for ch in 0..3 {
            let observed = f32::from(px[ch]);
            let fg = bg[ch] + (observed - bg[ch]) / a;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                px[ch] = fg.round().clamp(0.0, 255.0) as u8;
            }
        }
        touched += 1;
    }

    tracing::debug!(?background, pixels = touched, "decontaminated edge pixels");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn opaque_and_transparent_pixels_are_bit_identical() {
        let img = RgbaImage::from_fn(16, 16, |x, y| {
            let a = if (x + y) % 2 == 0 { 255 } else { 0 };
            let r = u8::try_from(x * 13).unwrap_or(u8::MAX);
            let g = u8::try_from(y * 7).unwrap_or(u8::MAX);
            Rgba([r, g, 99, a])
        });
        let out = decontaminate(&img, Rgb([255, 255, 255]));
        assert_eq!(out, img);
    }

    #[test]
    fn half_blended_red_over_white_is_recovered() {
        // Pure red at 50% over white observed as (255, 128, 128).
        let img = RgbaImage::from_pixel(1, 1, Rgba([255, 128, 128, 128]));
        let out = decontaminate(&img, Rgb([255, 255, 255]));
        let px = out.get_pixel(0, 0);
        assert_eq!(px[0], 255);
        assert!(px[1] <= 2 && px[2] <= 2, "got {:?}", px.0);
        assert_eq!(px[3], 128);
    }

    #[test]
    fn recovered_channels_are_clamped() {
        // Observed darker than any blend with white at this alpha could produce.
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 64]));
        let out = decontaminate(&img, Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 64]);
    }

    #[test]
    fn near_zero_alpha_is_left_alone() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([250, 250, 250, 1]));
        let out = decontaminate(&img, Rgb([255, 255, 255]));
        assert_eq!(out, img);
    }
}

//! Exact-fit resampling to the contractual output size.
//!
//! No cropping or padding: the output always has exactly the requested
//! dimensions, whatever the source aspect ratio. Resampling runs on
//! premultiplied alpha so colors hidden under fully transparent pixels never
//! bleed into visible edges.

use image::imageops::{self, FilterType};
use image::{Rgba, Rgba32FImage, RgbaImage};

use crate::config::ResizeSpec;
use crate::error::{Error, Result};

/// Premultiplied alphas below this become fully transparent on the way back.
const MIN_ALPHA: f32 = 0.5 / 255.0;

fn premultiply(img: &RgbaImage) -> Rgba32FImage {
    Rgba32FImage::from_fn(img.width(), img.height(), |x, y| {
        let px = img.get_pixel(x, y);
        let a = f32::from(px[3]) / 255.0;
        let c = |v: u8| f32::from(v) / 255.0 * a;
        Rgba([c(px[0]), c(px[1]), c(px[2]), a])
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unpremultiply(img: &Rgba32FImage) -> RgbaImage {
    let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    RgbaImage::from_fn(img.width(), img.height(), |x, y| {
        let px = img.get_pixel(x, y);
        let a = px[3].clamp(0.0, 1.0);
        if a < MIN_ALPHA {
            return Rgba([0, 0, 0, 0]);
        }
        let c = |v: f32| to_u8((v / a).clamp(0.0, 1.0));
        Rgba([c(px[0]), c(px[1]), c(px[2]), to_u8(a)])
    })
}

/// Resample `img` to exactly `target.width` x `target.height` with Lanczos3.
///
/// A source that already has the target size is returned as an identical copy.
///
/// # Errors
///
/// Returns [`Error::InvalidDimensions`] if the target or the source has a zero
/// dimension.
pub fn resize_exact(img: &RgbaImage, target: ResizeSpec) -> Result<RgbaImage> {
    target.validate()?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions { width, height });
    }
    if (width, height) == (target.width, target.height) {
        return Ok(img.clone());
    }

    let resized = imageops::resize(
        &premultiply(img),
        target.width,
        target.height,
        FilterType::Lanczos3,
    );

    tracing::debug!(
        from = %format!("{width}x{height}"),
        to = %format!("{}x{}", target.width, target.height),
        "resized"
    );

    Ok(unpremultiply(&resized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgba([200, 40, 40, 255])
            } else {
                Rgba([10, 10, 220, 128])
            }
        })
    }

    #[test]
    fn output_always_matches_requested_size() {
        let cases = [
            ((1, 1), (7, 3)),
            ((100, 50), (3, 200)),
            ((64, 64), (500, 500)),
            ((300, 300), (1920, 510)),
            ((513, 77), (1, 1)),
        ];
        for ((sw, sh), (tw, th)) in cases {
            let out = resize_exact(&checker(sw, sh), ResizeSpec::new(tw, th)).unwrap();
            assert_eq!(out.dimensions(), (tw, th), "{sw}x{sh} -> {tw}x{th}");
        }
    }

    #[test]
    fn same_size_is_identity() {
        let img = checker(16, 9);
        let out = resize_exact(&img, ResizeSpec::new(16, 9)).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn zero_target_is_rejected() {
        let err = resize_exact(&checker(4, 4), ResizeSpec::new(0, 4)).unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions { width: 0, height: 4 }));
    }

    #[test]
    fn hidden_color_under_transparency_does_not_bleed() {
        // Left half opaque red, right half fully transparent with a green payload.
        let img = RgbaImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 255, 0, 0])
            }
        });
        let out = resize_exact(&img, ResizeSpec::new(13, 11)).unwrap();
        for px in out.pixels().filter(|p| p[3] > 0) {
            assert_eq!(&px.0[..3], &[255, 0, 0], "bleed at {:?}", px.0);
        }
    }

    #[test]
    fn flat_opaque_color_survives_resampling() {
        let img = RgbaImage::from_pixel(40, 30, Rgba([90, 120, 150, 255]));
        let out = resize_exact(&img, ResizeSpec::new(97, 61)).unwrap();
        assert!(out.pixels().all(|p| p.0 == [90, 120, 150, 255]));
    }
}

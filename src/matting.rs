//! Difference matting: alpha and true color from two renders over known backgrounds.
//!
//! A pixel observed over background `C` is `O = alpha * F + (1 - alpha) * C`.
//! Two renders of the same subject over backgrounds `C1` and `C2` give two such
//! equations per channel, enough to solve for both `alpha` and `F`:
//!
//! `alpha = 1 - (O1 - O2) / (C1 - C2)`
//!
//! This recovers partial transparency (glass, soft shadows) that single-render
//! keying cannot.

use image::{Rgb, Rgba, RgbaImage};

use crate::config::{AlphaCombine, ForegroundSolve, MatteConfig};
use crate::error::{Error, Result};

/// Background channels closer than this (in 8-bit levels) carry no alpha information.
const DEGENERATE_DENOMINATOR: f32 = 1.0;

/// Alphas below this round to zero and are treated as fully transparent.
const ALPHA_EPSILON: f32 = 0.5 / 255.0;

/// An extracted matte: straight-alpha RGBA with the same size as the source.
///
/// Where alpha is 0 the color is unconstrained. Where alpha is 255 the color is
/// the observed color.
#[derive(Debug, Clone, PartialEq)]
pub struct MatteResult {
    image: RgbaImage,
    background: Option<Rgb<u8>>,
}

impl MatteResult {
    /// Wrap a matte. `background` is the flat color still blended into the
    /// translucent pixels, or `None` if their colors are already unmixed.
    #[must_use]
    pub fn new(image: RgbaImage, background: Option<Rgb<u8>>) -> Self {
        Self { image, background }
    }

    /// The matte as an RGBA image.
    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Take ownership of the RGBA image.
    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Background still mixed into edge colors, if any.
    #[must_use]
    pub fn background(&self) -> Option<Rgb<u8>> {
        self.background
    }

    /// Alpha value at `(x, y)`, or `None` outside the image.
    #[must_use]
    pub fn alpha_at(&self, x: u32, y: u32) -> Option<u8> {
        self.image.get_pixel_checked(x, y).map(|px| px[3])
    }
}

/// Merge per-channel alpha estimates. Returns `None` when no channel is valid.
fn combine(estimates: &[f32], rule: AlphaCombine) -> Option<f32> {
    if estimates.is_empty() {
        return None;
    }
    let merged = match rule {
        AlphaCombine::Mean => {
            #[allow(clippy::cast_precision_loss)]
            let n = estimates.len() as f32;
            estimates.iter().sum::<f32>() / n
        }
        AlphaCombine::Min => estimates.iter().copied().fold(f32::INFINITY, f32::min),
        AlphaCombine::Max => estimates.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    };
    Some(merged.clamp(0.0, 1.0))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Solve one pixel. Total: degenerate inputs yield a transparent pixel.
fn unmix_pixel(light: [u8; 3], dark: [u8; 3], config: &MatteConfig) -> Rgba<u8> {
    let bg_light = config.backgrounds.light.0.map(f32::from);
    let bg_dark = config.backgrounds.dark.0.map(f32::from);
    let obs_light = light.map(f32::from);
    let obs_dark = dark.map(f32::from);

    let mut estimates = [0.0_f32; 3];
    let mut valid = 0;
    for ch in 0..3 {
        let denom = bg_light[ch] - bg_dark[ch];
        if denom.abs() < DEGENERATE_DENOMINATOR {
            continue;
        }
        estimates[valid] = 1.0 - (obs_light[ch] - obs_dark[ch]) / denom;
        valid += 1;
    }

    let alpha = combine(&estimates[..valid], config.combine).unwrap_or(0.0);
    let alpha_u8 = to_u8(alpha * 255.0);
    if alpha < ALPHA_EPSILON || alpha_u8 == 0 {
        return Rgba([light[0], light[1], light[2], 0]);
    }
    if alpha_u8 == 255 {
        return Rgba([light[0], light[1], light[2], 255]);
    }

    let mut fg = [0u8; 3];
    for ch in 0..3 {
        let from_light = obs_light[ch] - (1.0 - alpha) * bg_light[ch];
        fg[ch] = match config.foreground {
            ForegroundSolve::Light => to_u8(from_light / alpha),
            ForegroundSolve::Averaged => {
                let from_dark = obs_dark[ch] - (1.0 - alpha) * bg_dark[ch];
                to_u8((from_light + from_dark) / (2.0 * alpha))
            }
        };
    }
    Rgba([fg[0], fg[1], fg[2], alpha_u8])
}

/// Extract alpha and foreground color from a light and a dark render.
///
/// Both renders must show the identical subject, camera and lighting; only the
/// flat background differs. Input alpha channels are ignored.
///
/// # Errors
///
/// Returns [`Error::InputDimensionMismatch`] if the renders differ in size.
pub fn difference_matte(
    light: &RgbaImage,
    dark: &RgbaImage,
    config: &MatteConfig,
) -> Result<MatteResult> {
    if light.dimensions() != dark.dimensions() {
        return Err(Error::InputDimensionMismatch {
            light_width: light.width(),
            light_height: light.height(),
            dark_width: dark.width(),
            dark_height: dark.height(),
        });
    }

    let mut out = RgbaImage::new(light.width(), light.height());
    for ((dst, l), d) in out.pixels_mut().zip(light.pixels()).zip(dark.pixels()) {
        *dst = unmix_pixel([l[0], l[1], l[2]], [d[0], d[1], d[2]], config);
    }

    tracing::debug!(
        width = light.width(),
        height = light.height(),
        combine = ?config.combine,
        "difference matte extracted"
    );

    Ok(MatteResult::new(out, None))
}

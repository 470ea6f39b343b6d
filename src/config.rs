//! Pipeline configuration.
//!
//! A single immutable [`PipelineConfig`] is built once, validated, and passed by
//! reference into every stage. Nothing in the crate reads ambient settings.

use std::str::FromStr;

use image::Rgb;

use crate::error::{Error, Result};

/// Default chroma-key distance below which a pixel is fully transparent.
pub const DEFAULT_LOW_THRESHOLD: f32 = 15.0;

/// Default chroma-key distance above which a pixel is fully opaque.
pub const DEFAULT_HIGH_THRESHOLD: f32 = 80.0;

/// Exact output dimensions for an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeSpec {
    /// Target width in pixels, must be > 0.
    pub width: u32,
    /// Target height in pixels, must be > 0.
    pub height: u32,
}

impl ResizeSpec {
    /// Square device render.
    pub const DEVICE: Self = Self::new(2160, 2160);
    /// Wide letterboxed logo.
    pub const LOGO: Self = Self::new(1920, 510);

    /// Create a spec; validity is checked by [`ResizeSpec::validate`].
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Reject zero dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] if either dimension is zero.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl Default for ResizeSpec {
    fn default() -> Self {
        Self::DEVICE
    }
}

impl FromStr for ResizeSpec {
    type Err = Error;

    /// Parse `WxH`, e.g. `1920x510`.
    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| Error::InvalidConfig(format!("expected WxH, got {s:?}")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| Error::InvalidConfig(format!("bad dimension {v:?}: {e}")))
        };
        let spec = Self::new(parse(w)?, parse(h)?);
        spec.validate()?;
        Ok(spec)
    }
}

/// Quality bounds for palette quantization, both in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizeSpec {
    /// Below this quality the image is left unquantized.
    pub min_quality: u8,
    /// Quantization stops growing the palette once this quality is reached.
    pub max_quality: u8,
}

impl QuantizeSpec {
    /// Create a spec; validity is checked by [`QuantizeSpec::validate`].
    #[must_use]
    pub const fn new(min_quality: u8, max_quality: u8) -> Self {
        Self {
            min_quality,
            max_quality,
        }
    }

    /// Check range and ordering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a bound exceeds 100 or `min > max`.
    pub fn validate(&self) -> Result<()> {
        if self.max_quality > 100 {
            return Err(Error::InvalidConfig(format!(
                "quality {} exceeds 100",
                self.max_quality
            )));
        }
        if self.min_quality > self.max_quality {
            return Err(Error::InvalidConfig(format!(
                "quality range {}-{} has min > max",
                self.min_quality, self.max_quality
            )));
        }
        Ok(())
    }
}

impl Default for QuantizeSpec {
    fn default() -> Self {
        Self::new(65, 80)
    }
}

impl FromStr for QuantizeSpec {
    type Err = Error;

    /// Parse `min-max` (e.g. `65-80`) or a single value `q` meaning `q-q`.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u8>()
                .map_err(|e| Error::InvalidConfig(format!("bad quality {v:?}: {e}")))
        };
        let spec = match s.split_once('-') {
            Some((min, max)) => Self::new(parse(min)?, parse(max)?),
            None => {
                let q = parse(s)?;
                Self::new(q, q)
            }
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Corner sampling parameters for background estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// Side length of each square corner patch, clamped to the image size.
    pub patch_size: u32,
    /// Maximum per-channel standard deviation inside a patch for it to count as flat.
    pub max_patch_stddev: f32,
    /// Maximum RGB distance from the consensus color for a flat patch to be kept.
    pub max_consensus_distance: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            patch_size: 8,
            max_patch_stddev: 6.0,
            max_consensus_distance: 24.0,
        }
    }
}

/// Chroma-key ramp thresholds. `None` derives a value from the sampled tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChromaKeyConfig {
    /// Distance at or below which a pixel is fully transparent.
    pub low_threshold: Option<f32>,
    /// Distance at or above which a pixel is fully opaque.
    pub high_threshold: Option<f32>,
}

/// How per-channel alpha estimates are merged into one alpha per pixel.
///
/// The choice mostly matters on colored fringes where the channels disagree:
/// `Min` keeps fringes more transparent, `Max` more opaque, `Mean` sits between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaCombine {
    /// Average of the valid channel estimates.
    #[default]
    Mean,
    /// Smallest valid channel estimate.
    Min,
    /// Largest valid channel estimate.
    Max,
}

impl FromStr for AlphaCombine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "avg" | "average" => Ok(Self::Mean),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(Error::InvalidConfig(format!(
                "unknown alpha combine rule {other:?} (expected mean, min or max)"
            ))),
        }
    }
}

/// How the foreground color of a translucent pixel is solved once alpha is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForegroundSolve {
    /// `fg = (O_light - (1 - alpha) * C_light) / alpha`, from the light render only.
    #[default]
    Light,
    /// Average of the light-render and dark-render solutions.
    Averaged,
}

impl FromStr for ForegroundSolve {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "averaged" | "avg" | "both" => Ok(Self::Averaged),
            other => Err(Error::InvalidConfig(format!(
                "unknown foreground solve {other:?} (expected light or averaged)"
            ))),
        }
    }
}

/// The two known flat backgrounds used for difference matting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundPair {
    /// Background of the first ("light") render.
    pub light: Rgb<u8>,
    /// Background of the second ("dark") render.
    pub dark: Rgb<u8>,
}

impl Default for BackgroundPair {
    fn default() -> Self {
        Self {
            light: Rgb([255, 255, 255]),
            dark: Rgb([0, 0, 0]),
        }
    }
}

/// Difference-matting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatteConfig {
    /// Known backgrounds of the two renders.
    pub backgrounds: BackgroundPair,
    /// Per-channel alpha combination rule.
    pub combine: AlphaCombine,
    /// Foreground color recovery for translucent pixels.
    pub foreground: ForegroundSolve,
}

/// Every tunable of the processing core.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Exact output size.
    pub target: ResizeSpec,
    /// Background sampling.
    pub sampler: SamplerConfig,
    /// Chroma-key thresholds.
    pub chroma: ChromaKeyConfig,
    /// Difference matting.
    pub matte: MatteConfig,
    /// Remove background bleed from translucent pixels.
    pub decontaminate: bool,
    /// Palette quantization; `None` disables it.
    pub quantize: Option<QuantizeSpec>,
    /// Background assumed when sampling fails and none was given.
    pub fallback_background: Rgb<u8>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target: ResizeSpec::default(),
            sampler: SamplerConfig::default(),
            chroma: ChromaKeyConfig::default(),
            matte: MatteConfig::default(),
            decontaminate: true,
            quantize: Some(QuantizeSpec::default()),
            fallback_background: Rgb([255, 255, 255]),
        }
    }
}

impl PipelineConfig {
    /// Check every field once, up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] or [`Error::InvalidConfig`] for the
    /// first offending value.
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if let Some(q) = &self.quantize {
            q.validate()?;
        }
        if self.sampler.patch_size == 0 {
            return Err(Error::InvalidConfig("sampler patch size must be > 0".into()));
        }
        if self.sampler.max_patch_stddev < 0.0 || self.sampler.max_consensus_distance < 0.0 {
            return Err(Error::InvalidConfig(
                "sampler tolerances must be non-negative".into(),
            ));
        }
        for t in [self.chroma.low_threshold, self.chroma.high_threshold]
            .into_iter()
            .flatten()
        {
            if !t.is_finite() || t < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "chroma threshold {t} must be a non-negative number"
                )));
            }
        }
        if let (Some(low), Some(high)) = (self.chroma.low_threshold, self.chroma.high_threshold) {
            if low >= high {
                return Err(Error::InvalidConfig(format!(
                    "chroma low threshold {low} must be below high threshold {high}"
                )));
            }
        }
        Ok(())
    }
}

/// Parse `#RRGGBB` or `RRGGBB`.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the string is not six hex digits.
pub fn parse_hex_color(s: &str) -> Result<Rgb<u8>> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(Error::InvalidConfig(format!("expected RRGGBB color, got {s:?}")));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|e| Error::InvalidConfig(format!("bad color {s:?}: {e}")))
    };
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

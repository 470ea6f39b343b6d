//! Per-asset processing pipeline.
//!
//! Matte extraction (difference or chroma key), then decontamination, exact
//! resize and optional quantization. Each stage takes the previous buffer by
//! reference and returns a new one; a [`Pipeline`] holds only its immutable
//! configuration and can be shared across threads.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbaImage};

use crate::chroma::{self, ChromaThresholds};
use crate::config::PipelineConfig;
use crate::decontaminate;
use crate::error::{Error, Result, Warning};
use crate::io;
use crate::matting::{self, MatteResult};
use crate::quantize::{self, IndexedImage, QuantizeOutcome};
use crate::resize;
use crate::sampling::{self, BackgroundEstimate};

/// Share of fully transparent, edge and fully opaque pixels, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoverageStats {
    /// Pixels with alpha == 0.
    pub transparent_pct: f32,
    /// Pixels with 0 < alpha < 255.
    pub edge_pct: f32,
    /// Pixels with alpha == 255.
    pub opaque_pct: f32,
}

impl CoverageStats {
    /// Count alpha classes over `img`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn from_image(img: &RgbaImage) -> Self {
        let total = u64::from(img.width()) * u64::from(img.height());
        if total == 0 {
            return Self::default();
        }
        let (mut transparent, mut opaque) = (0u64, 0u64);
        for px in img.pixels() {
            match px[3] {
                0 => transparent += 1,
                255 => opaque += 1,
                _ => {}
            }
        }
        let pct = |n: u64| (n as f64 / total as f64 * 100.0) as f32;
        Self {
            transparent_pct: pct(transparent),
            edge_pct: pct(total - transparent - opaque),
            opaque_pct: pct(opaque),
        }
    }
}

/// Everything one pipeline run produced, still in memory.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Final straight-alpha RGBA image at the target size.
    pub image: RgbaImage,
    /// Palette variant, when quantization ran and met the minimum quality.
    pub quantized: Option<IndexedImage>,
    /// Background keyed out, for chroma-key runs.
    pub background: Option<Rgb<u8>>,
    /// Alpha coverage of `image`.
    pub coverage: CoverageStats,
    /// Non-fatal conditions hit along the way.
    pub warnings: Vec<Warning>,
}

/// Files written for one asset.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    /// Path of the RGBA PNG.
    pub output: PathBuf,
    /// Path of the indexed PNG, if one was written.
    pub indexed_output: Option<PathBuf>,
    /// Background keyed out, for chroma-key runs.
    pub background: Option<Rgb<u8>>,
    /// Alpha coverage of the written image.
    pub coverage: CoverageStats,
    /// Quality reached by the indexed variant.
    pub quantized_quality: Option<u8>,
    /// Non-fatal conditions hit along the way.
    pub warnings: Vec<Warning>,
}

fn record(warnings: &mut Vec<Warning>, warning: Warning) {
    tracing::warn!(%warning, "degraded result");
    warnings.push(warning);
}

/// The processing core, configured once and reused for many assets.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate `config` and build a pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first validation error from [`PipelineConfig::validate`].
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Estimate the background of `img`, falling back to the configured color.
    fn resolve_background(
        &self,
        img: &RgbaImage,
        explicit: Option<Rgb<u8>>,
        warnings: &mut Vec<Warning>,
    ) -> Result<BackgroundEstimate> {
        if let Some(color) = explicit {
            return Ok(BackgroundEstimate::exact(color, img.dimensions()));
        }
        match sampling::sample_background(img, &self.config.sampler) {
            Ok(estimate) => Ok(estimate),
            Err(Error::InsufficientBackgroundSample { rejected }) => {
                let fallback = self.config.fallback_background;
                record(
                    warnings,
                    Warning::InsufficientBackgroundSample {
                        rejected,
                        fallback: fallback.0,
                    },
                );
                Ok(BackgroundEstimate::exact(fallback, img.dimensions()))
            }
            Err(e) => Err(e),
        }
    }

    /// Run the pipeline on a light/dark render pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputDimensionMismatch`] if the renders differ in size.
    pub fn difference(&self, light: &RgbaImage, dark: &RgbaImage) -> Result<PipelineOutput> {
        let matte = matting::difference_matte(light, dark, &self.config.matte)?;
        self.finish(&matte, Vec::new())
    }

    /// Run the pipeline on a single render over a flat background.
    ///
    /// Without an explicit `background` the color is sampled from the corners.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] for an empty image.
    pub fn chroma_key(
        &self,
        img: &RgbaImage,
        background: Option<Rgb<u8>>,
    ) -> Result<PipelineOutput> {
        let mut warnings = Vec::new();
        let estimate = self.resolve_background(img, background, &mut warnings)?;
        debug_assert!(estimate.applies_to(img));
        let thresholds = ChromaThresholds::resolve(&self.config.chroma, &estimate);
        let matte = chroma::chroma_key(img, estimate.color, thresholds);
        self.finish(&matte, warnings)
    }

    /// Decontaminate, resize and quantize an extracted matte.
    fn finish(&self, matte: &MatteResult, mut warnings: Vec<Warning>) -> Result<PipelineOutput> {
        let background = matte.background();
        let resized = match background {
            Some(bg) if self.config.decontaminate => {
                let clean = decontaminate::decontaminate(matte.image(), bg);
                resize::resize_exact(&clean, self.config.target)?
            }
            _ => resize::resize_exact(matte.image(), self.config.target)?,
        };

        let quantized = match &self.config.quantize {
            None => None,
            Some(spec) => match quantize::quantize(&resized, spec) {
                QuantizeOutcome::Indexed(indexed) => Some(indexed),
                QuantizeOutcome::Unattainable { best_quality } => {
                    record(
                        &mut warnings,
                        Warning::QuantizationQualityUnattainable {
                            min_quality: spec.min_quality,
                            best_quality,
                        },
                    );
                    None
                }
            },
        };

        Ok(PipelineOutput {
            coverage: CoverageStats::from_image(&resized),
            image: resized,
            quantized,
            background,
            warnings,
        })
    }

    /// Write the RGBA result to `output` and any palette variant next to it.
    ///
    /// A palette variant left over from an earlier run is removed when this
    /// result has none.
    ///
    /// # Errors
    ///
    /// Returns the underlying encode or I/O error; neither file of the asset is
    /// left behind.
    #[allow(clippy::unused_self)]
    pub fn write(&self, result: PipelineOutput, output: &Path) -> Result<ProcessReport> {
        let indexed_output = io::save_asset(&result.image, result.quantized.as_ref(), output)?;

        Ok(ProcessReport {
            output: output.to_path_buf(),
            indexed_output,
            background: result.background,
            coverage: result.coverage,
            quantized_quality: result.quantized.as_ref().map(IndexedImage::quality),
            warnings: result.warnings,
        })
    }

    /// Load a light/dark render pair, process it, and write the result.
    ///
    /// # Errors
    ///
    /// Returns load, matting, or write errors for this asset only.
    pub fn process_difference_files(
        &self,
        light: &Path,
        dark: &Path,
        output: &Path,
    ) -> Result<ProcessReport> {
        let light_img = io::load_rgba(light)?;
        let dark_img = io::load_rgba(dark)?;
        let result = self.difference(&light_img, &dark_img)?;
        self.write(result, output)
    }

    /// Load a single render, key out its background, and write the result.
    ///
    /// # Errors
    ///
    /// Returns load or write errors for this asset only.
    pub fn process_chroma_file(
        &self,
        input: &Path,
        background: Option<Rgb<u8>>,
        output: &Path,
    ) -> Result<ProcessReport> {
        let img = io::load_rgba(input)?;
        let result = self.chroma_key(&img, background)?;
        self.write(result, output)
    }
}

//! Turn flat-background renders into clean, theme-ready transparent assets.
//!
//! Alpha is recovered either by difference matting (two renders of the same
//! subject over a light and a dark background) or by chroma keying a single
//! render against its sampled background. Edge pixels are then decontaminated,
//! resized to the exact asset size, and optionally quantized to a palette.
//!
//! # Quick Start
//!
//! ```no_run
//! use asset_matte::{Pipeline, PipelineConfig, ResizeSpec};
//!
//! let config = PipelineConfig {
//!     target: ResizeSpec::LOGO,
//!     ..PipelineConfig::default()
//! };
//! let pipeline = Pipeline::new(config).expect("valid config");
//! let report = pipeline
//!     .process_difference_files("logo_white.png".as_ref(), "logo_black.png".as_ref(), "logo.png".as_ref())
//!     .expect("processing failed");
//! println!("opaque: {:.1}%", report.coverage.opaque_pct);
//! ```
//!
//! # Single render
//!
//! ```no_run
//! use asset_matte::{Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(PipelineConfig::default()).expect("valid config");
//! let img = image::open("device.png").unwrap().to_rgba8();
//! let out = pipeline.chroma_key(&img, None).expect("keying failed");
//! for warning in &out.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! ```

#![deny(missing_docs)]

pub mod chroma;
pub mod config;
pub mod decontaminate;
pub mod error;
pub mod io;
pub mod matting;
mod pipeline;
pub mod quantize;
pub mod resize;
pub mod sampling;

pub use config::{
    AlphaCombine, BackgroundPair, ChromaKeyConfig, ForegroundSolve, MatteConfig, PipelineConfig,
    QuantizeSpec, ResizeSpec, SamplerConfig,
};
pub use error::{Error, Result, Warning};
pub use io::{default_output_path, indexed_output_path, is_supported_image};
pub use matting::MatteResult;
pub use pipeline::{CoverageStats, Pipeline, PipelineOutput, ProcessReport};
pub use quantize::{IndexedImage, QuantizeOutcome};
pub use sampling::BackgroundEstimate;

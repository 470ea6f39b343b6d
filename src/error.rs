//! Error and warning types for the asset-matte crate.

use std::fmt;

/// Errors that abort processing of a single asset.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The two difference-matting renders do not have the same size.
    #[error(
        "input dimension mismatch: light render is {light_width}x{light_height}, \
         dark render is {dark_width}x{dark_height}"
    )]
    InputDimensionMismatch {
        /// Width of the render over the light background.
        light_width: u32,
        /// Height of the render over the light background.
        light_height: u32,
        /// Width of the render over the dark background.
        dark_width: u32,
        /// Height of the render over the dark background.
        dark_height: u32,
    },

    /// Every sampled region was rejected as non-flat or inconsistent.
    #[error("insufficient background sample: all {rejected} sampled regions rejected")]
    InsufficientBackgroundSample {
        /// Number of regions that were sampled and rejected.
        rejected: usize,
    },

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A requested or supplied image size has a zero dimension.
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },

    /// The file format is not a supported lossless container.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred while decoding or encoding an image.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Encoding the palette PNG failed.
    #[error("palette PNG encoding failed: {0}")]
    PngEncode(#[from] png::EncodingError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal conditions: processing continues with a degraded result.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// Background sampling failed and the fallback color was used instead.
    InsufficientBackgroundSample {
        /// Number of rejected sample regions.
        rejected: usize,
        /// The fallback background used for keying.
        fallback: [u8; 3],
    },
    /// No palette reached the minimum quality; the image was left unquantized.
    QuantizationQualityUnattainable {
        /// Requested minimum quality.
        min_quality: u8,
        /// Best quality a full palette achieved.
        best_quality: u8,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientBackgroundSample { rejected, fallback } => write!(
                f,
                "all {rejected} background samples rejected, using fallback #{:02X}{:02X}{:02X}",
                fallback[0], fallback[1], fallback[2]
            ),
            Self::QuantizationQualityUnattainable {
                min_quality,
                best_quality,
            } => write!(
                f,
                "quantization reached quality {best_quality}, below minimum {min_quality}; \
                 keeping unquantized image"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("jpeg".to_string());
        assert!(unsupported.to_string().contains("jpeg"));

        let mismatch = Error::InputDimensionMismatch {
            light_width: 10,
            light_height: 20,
            dark_width: 30,
            dark_height: 40,
        };
        let msg = mismatch.to_string();
        assert!(msg.contains("10x20"));
        assert!(msg.contains("30x40"));
    }

    #[test]
    fn warning_display_names_fallback_color() {
        let w = Warning::InsufficientBackgroundSample {
            rejected: 4,
            fallback: [0x25, 0x28, 0x3B],
        };
        assert!(w.to_string().contains("#25283B"));

        let q = Warning::QuantizationQualityUnattainable {
            min_quality: 65,
            best_quality: 40,
        };
        let msg = q.to_string();
        assert!(msg.contains("65"));
        assert!(msg.contains("40"));
    }
}

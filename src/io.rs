//! Loading renders and writing results.
//!
//! Writes are atomic: output is encoded into a temporary file in the
//! destination directory and renamed over the target only once complete. On any
//! error the temporary file is dropped and removed.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use image::{ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::quantize::IndexedImage;

/// Check if a file has a supported lossless image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "png" | "bmp" | "tif" | "tiff"
        ),
        None => false,
    }
}

/// Load an RGB or RGBA raster as straight-alpha RGBA8.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] for extensions outside the lossless set,
/// or the underlying I/O / decode error.
pub fn load_rgba(path: &Path) -> Result<RgbaImage> {
    if !is_supported_image(path) {
        return Err(Error::UnsupportedFormat(path.display().to_string()));
    }
    let img = image::open(path)?;
    tracing::debug!(
        path = %path.display(),
        width = img.width(),
        height = img.height(),
        color = ?img.color(),
        "loaded"
    );
    Ok(img.to_rgba8())
}

/// Read image dimensions without decoding pixel data.
///
/// # Errors
///
/// Returns the underlying I/O or decode error.
pub fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    Ok(image::image_dimensions(path)?)
}

/// Whether the file's color type carries an alpha channel. Reads only the header.
///
/// # Errors
///
/// Returns the underlying I/O or decode error.
pub fn has_alpha_channel(path: &Path) -> Result<bool> {
    let decoder = ImageReader::open(path)?.with_guessed_format()?.into_decoder()?;
    Ok(decoder.color_type().has_alpha())
}

/// Encoded bytes waiting in a temporary file next to their destination.
///
/// Dropping a staged file without committing removes the temporary file.
struct Staged {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl Staged {
    /// Rename the temporary file over the target.
    fn commit(self) -> Result<()> {
        self.tmp.persist(&self.target).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

fn stage(path: &Path, bytes: &[u8]) -> Result<Staged> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(Staged {
        tmp,
        target: path.to_path_buf(),
    })
}

fn ensure_png_path(path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    if format != ImageFormat::Png {
        return Err(Error::UnsupportedFormat(format!("{format:?}")));
    }
    Ok(())
}

fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::InvalidDimensions {
            width: img.width(),
            height: img.height(),
        });
    }
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

fn encode_indexed_png(img: &IndexedImage) -> Result<Vec<u8>> {
    let plte: Vec<u8> = img.palette().iter().flat_map(|p| [p[0], p[1], p[2]]).collect();
    let trns: Vec<u8> = img.palette().iter().map(|p| p[3]).collect();

    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = png::Encoder::new(&mut buf, img.width(), img.height());
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_palette(plte);
        if trns.iter().any(|&a| a < 255) {
            encoder.set_trns(trns);
        }
        let mut writer = encoder.write_header()?;
        writer.write_image_data(img.indices())?;
        writer.finish()?;
    }
    Ok(buf.into_inner())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed stale output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Save a straight-alpha RGBA image as PNG, atomically.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] if `path` does not end in `.png`, or the
/// underlying encode / I/O error.
pub fn save_png(img: &RgbaImage, path: &Path) -> Result<()> {
    ensure_png_path(path)?;
    stage(path, &encode_png(img)?)?.commit()?;
    tracing::info!(path = %path.display(), "wrote RGBA PNG");
    Ok(())
}

/// Save a palette image as an 8-bit indexed PNG with a `tRNS` chunk, atomically.
///
/// # Errors
///
/// Returns the underlying encode or I/O error.
pub fn save_indexed_png(img: &IndexedImage, path: &Path) -> Result<()> {
    stage(path, &encode_indexed_png(img)?)?.commit()?;
    tracing::info!(
        path = %path.display(),
        colors = img.palette().len(),
        "wrote indexed PNG"
    );
    Ok(())
}

/// Write one asset: the RGBA PNG at `output` plus, if given, the indexed
/// variant at [`indexed_output_path`].
///
/// Both files are encoded and staged before either becomes visible. Without an
/// indexed variant, a leftover indexed file from an earlier run is removed so
/// the pair on disk always matches. Returns the indexed path if one was written.
///
/// # Errors
///
/// Returns the underlying encode or I/O error. On error neither file of this
/// asset is left at its destination.
pub fn save_asset(
    img: &RgbaImage,
    indexed: Option<&IndexedImage>,
    output: &Path,
) -> Result<Option<PathBuf>> {
    ensure_png_path(output)?;
    let indexed_path = indexed_output_path(output);

    let rgba = stage(output, &encode_png(img)?)?;
    let variant = match indexed {
        Some(q) => Some(stage(&indexed_path, &encode_indexed_png(q)?)?),
        None => {
            remove_if_present(&indexed_path)?;
            None
        }
    };

    rgba.commit()?;
    tracing::info!(path = %output.display(), "wrote RGBA PNG");

    let Some(variant) = variant else {
        return Ok(None);
    };
    if let Err(e) = variant.commit() {
        if let Err(cleanup) = std::fs::remove_file(output) {
            tracing::warn!(path = %output.display(), error = %cleanup, "could not roll back RGBA output");
        }
        return Err(e);
    }
    tracing::info!(path = %indexed_path.display(), "wrote indexed PNG");
    Ok(Some(indexed_path))
}

/// Default output path: `"logo.png"` becomes `"logo_matte.png"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    sibling_with_suffix(input, "matte")
}

/// Where the quantized variant of `output` goes: `"logo.png"` becomes `"logo_indexed.png"`.
#[must_use]
pub fn indexed_output_path(output: &Path) -> PathBuf {
    sibling_with_suffix(output, "indexed")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_{suffix}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuantizeSpec;
    use crate::quantize::{quantize, QuantizeOutcome};
    use image::Rgba;

    fn sample_image() -> RgbaImage {
        RgbaImage::from_fn(12, 8, |x, y| {
            if x < 3 {
                Rgba([255, 255, 255, 0])
            } else if y < 4 {
                Rgba([200, 30, 30, 255])
            } else {
                Rgba([30, 30, 200, 128])
            }
        })
    }

    #[test]
    fn default_output_path_appends_matte_suffix() {
        let p = default_output_path(Path::new("/tmp/logo.png"));
        assert_eq!(p, PathBuf::from("/tmp/logo_matte.png"));

        let p = indexed_output_path(Path::new("device.png"));
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), "device_indexed.png");
    }

    #[test]
    fn is_supported_image_accepts_lossless_formats() {
        assert!(is_supported_image(Path::new("render.png")));
        assert!(is_supported_image(Path::new("render.PNG")));
        assert!(is_supported_image(Path::new("render.tiff")));
        assert!(is_supported_image(Path::new("render.bmp")));
        assert!(!is_supported_image(Path::new("render.jpg")));
        assert!(!is_supported_image(Path::new("render")));
    }

    #[test]
    fn rgba_png_round_trips_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.png");
        let img = sample_image();

        save_png(&img, &path).unwrap();
        assert_eq!(load_rgba(&path).unwrap(), img);
        assert_eq!(image_dimensions(&path).unwrap(), (12, 8));
        assert!(has_alpha_channel(&path).unwrap());

        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn uncommitted_stage_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        std::fs::write(&path, b"previous").unwrap();

        let staged = stage(&path, b"half an ima").unwrap();
        drop(staged);
        assert_eq!(std::fs::read(&path).unwrap(), b"previous");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    fn palette_of(img: &RgbaImage) -> IndexedImage {
        match quantize(img, &QuantizeSpec::new(0, 100)) {
            QuantizeOutcome::Indexed(q) => q,
            QuantizeOutcome::Unattainable { .. } => panic!("expected a palette"),
        }
    }

    #[test]
    fn asset_pair_is_written_together() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("logo.png");
        let img = sample_image();

        let indexed = save_asset(&img, Some(&palette_of(&img)), &output).unwrap();
        assert_eq!(indexed, Some(dir.path().join("logo_indexed.png")));
        assert_eq!(load_rgba(&output).unwrap(), img);
        assert!(dir.path().join("logo_indexed.png").is_file());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn failed_indexed_write_rolls_back_rgba_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("logo.png");
        std::fs::create_dir(dir.path().join("logo_indexed.png")).unwrap();
        let img = sample_image();

        let result = save_asset(&img, Some(&palette_of(&img)), &output);
        assert!(result.is_err());
        assert!(!output.exists());
        // Only the blocking directory remains; no temp files either.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn stale_indexed_variant_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("logo.png");
        let img = sample_image();
        save_asset(&img, Some(&palette_of(&img)), &output).unwrap();
        assert!(indexed_output_path(&output).exists());

        let indexed = save_asset(&img, None, &output).unwrap();
        assert_eq!(indexed, None);
        assert!(output.exists());
        assert!(!indexed_output_path(&output).exists());

        // Nothing to remove on a fresh directory.
        let fresh = dir.path().join("fresh").join("icon.png");
        assert_eq!(save_asset(&img, None, &fresh).unwrap(), None);
    }

    #[test]
    fn empty_image_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let err = save_png(&RgbaImage::new(0, 0), &path).unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn non_png_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_png(&sample_image(), &dir.path().join("out.bmp")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn indexed_png_decodes_to_quantized_pixels() {
        let img = sample_image();
        let QuantizeOutcome::Indexed(q) = quantize(&img, &QuantizeSpec::new(90, 100)) else {
            panic!("expected a palette");
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out_indexed.png");
        save_indexed_png(&q, &path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded, q.to_rgba());
        for (src, out) in img.pixels().zip(decoded.pixels()) {
            assert_eq!(src[3], out[3]);
            if src[3] > 0 {
                assert_eq!(src, out);
            }
        }
    }

    #[test]
    fn missing_input_is_an_io_error() {
        let err = load_rgba(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, Error::Image(_) | Error::Io(_)));
    }
}

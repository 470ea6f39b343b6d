//! Palette quantization with a quality bound.
//!
//! Median cut over the histogram of visible (alpha > 0) RGBA colors. Boxes are
//! split, worst first, until the mean per-channel error meets the maximum
//! quality or the palette is full. Every alpha == 0 pixel maps to a dedicated
//! transparent entry, so the transparent region is preserved pixel for pixel.

use std::collections::HashMap;

use image::{Rgba, RgbaImage};

use crate::config::QuantizeSpec;

/// Mean absolute per-channel error (in 8-bit levels) that corresponds to quality 0.
const ERROR_AT_ZERO_QUALITY: f64 = 32.0;

/// Largest palette an 8-bit indexed image can carry.
const MAX_PALETTE: usize = 256;

/// Mean per-channel error allowed at `quality` (0-100).
#[must_use]
pub fn max_mean_error(quality: u8) -> f64 {
    f64::from(100 - quality.min(100)) / 100.0 * ERROR_AT_ZERO_QUALITY
}

/// Quality score (0-100) reached by a mean per-channel error.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quality_for_error(error: f64) -> u8 {
    let q = 100.0 - error / ERROR_AT_ZERO_QUALITY * 100.0;
    // Absorb float noise so quality_for_error(max_mean_error(q)) == q.
    (q + 1e-9).floor().clamp(0.0, 100.0) as u8
}

/// An 8-bit palette image.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedImage {
    width: u32,
    height: u32,
    palette: Vec<Rgba<u8>>,
    indices: Vec<u8>,
    transparent_index: Option<u8>,
    mean_error: f64,
}

impl IndexedImage {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Palette entries, at most 256.
    #[must_use]
    pub fn palette(&self) -> &[Rgba<u8>] {
        &self.palette
    }

    /// One palette index per pixel, row-major.
    #[must_use]
    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    /// Index reserved for fully transparent pixels, if the image has any.
    #[must_use]
    pub fn transparent_index(&self) -> Option<u8> {
        self.transparent_index
    }

    /// Mean absolute per-channel error over visible pixels.
    #[must_use]
    pub fn mean_error(&self) -> f64 {
        self.mean_error
    }

    /// Quality score reached.
    #[must_use]
    pub fn quality(&self) -> u8 {
        quality_for_error(self.mean_error)
    }

    /// Expand back to straight-alpha RGBA.
    #[must_use]
    pub fn to_rgba(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        for (dst, &idx) in out.pixels_mut().zip(self.indices.iter()) {
            *dst = self.palette[usize::from(idx)];
        }
        out
    }
}

/// Outcome of [`quantize`].
#[derive(Debug, Clone, PartialEq)]
pub enum QuantizeOutcome {
    /// A palette met at least the minimum quality.
    Indexed(IndexedImage),
    /// Even a full palette stayed below the minimum; keep the source image.
    Unattainable {
        /// Quality the full palette reached.
        best_quality: u8,
    },
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    color: [u8; 4],
    count: u32,
}

#[derive(Debug, Clone)]
struct ColorBox {
    start: usize,
    end: usize,
    mean: [f64; 4],
    error: f64,
}

impl ColorBox {
    fn new(entries: &[Entry], start: usize, end: usize) -> Self {
        let slice = &entries[start..end];
        let total: f64 = slice.iter().map(|e| f64::from(e.count)).sum();
        let mut mean = [0.0_f64; 4];
        for e in slice {
            for ch in 0..4 {
                mean[ch] += f64::from(e.color[ch]) * f64::from(e.count);
            }
        }
        for m in &mut mean {
            *m /= total;
        }
        let error = slice
            .iter()
            .map(|e| {
                let dev: f64 = (0..4)
                    .map(|ch| (f64::from(e.color[ch]) - mean[ch]).abs())
                    .sum();
                dev * f64::from(e.count)
            })
            .sum();
        Self {
            start,
            end,
            mean,
            error,
        }
    }

    fn len(&self) -> usize {
        self.end - self.start
    }

    /// Channel with the widest value range inside the box.
    fn widest_channel(&self, entries: &[Entry]) -> usize {
        let slice = &entries[self.start..self.end];
        (0..4)
            .max_by_key(|&ch| {
                let lo = slice.iter().map(|e| e.color[ch]).min().unwrap_or(0);
                let hi = slice.iter().map(|e| e.color[ch]).max().unwrap_or(0);
                hi - lo
            })
            .unwrap_or(0)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn representative(&self) -> Rgba<u8> {
        // Every entry has alpha >= 1, so the rounded mean alpha does too.
        Rgba(self.mean.map(|v| v.round().clamp(1.0, 255.0) as u8))
    }
}

/// Split `b` at the weighted median of its widest channel.
fn split(entries: &mut [Entry], b: &ColorBox) -> (ColorBox, ColorBox) {
    let ch = b.widest_channel(entries);
    entries[b.start..b.end].sort_unstable_by_key(|e| e.color[ch]);

    let total: u64 = entries[b.start..b.end]
        .iter()
        .map(|e| u64::from(e.count))
        .sum();
    let mut acc = 0u64;
    let mut cut = b.start + 1;
    for (i, e) in entries[b.start..b.end].iter().enumerate() {
        acc += u64::from(e.count);
        if acc * 2 >= total {
            cut = b.start + i + 1;
            break;
        }
    }
    let cut = cut.clamp(b.start + 1, b.end - 1);

    (
        ColorBox::new(entries, b.start, cut),
        ColorBox::new(entries, cut, b.end),
    )
}

fn l1(a: [u8; 4], b: [u8; 4]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| u32::from(x.abs_diff(y)))
        .sum()
}

/// Reduce `img` to at most 256 colors within `spec`'s quality range.
///
/// Returns [`QuantizeOutcome::Unattainable`] when no palette reaches
/// `spec.min_quality`; the caller keeps the unquantized image.
#[must_use]
pub fn quantize(img: &RgbaImage, spec: &QuantizeSpec) -> QuantizeOutcome {
    let mut histogram: HashMap<[u8; 4], u32> = HashMap::new();
    let mut has_transparent = false;
    for px in img.pixels() {
        if px[3] == 0 {
            has_transparent = true;
        } else {
            *histogram.entry(px.0).or_insert(0) += 1;
        }
    }

    let mut entries: Vec<Entry> = histogram
        .into_iter()
        .map(|(color, count)| Entry { color, count })
        .collect();
    let visible: u64 = entries.iter().map(|e| u64::from(e.count)).sum();
    let budget = MAX_PALETTE - usize::from(has_transparent);

    #[allow(clippy::cast_precision_loss)]
    let target_error = max_mean_error(spec.max_quality) * visible as f64 * 4.0;

    let mut boxes = Vec::new();
    if !entries.is_empty() {
        boxes.push(ColorBox::new(&entries, 0, entries.len()));
    }
    while boxes.len() < budget {
        let total: f64 = boxes.iter().map(|b| b.error).sum();
        if total <= target_error {
            break;
        }
        let Some((worst, _)) = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.len() > 1 && b.error > 0.0)
            .max_by(|(_, a), (_, b)| a.error.total_cmp(&b.error))
        else {
            break;
        };
        let b = boxes.swap_remove(worst);
        let (left, right) = split(&mut entries, &b);
        boxes.push(left);
        boxes.push(right);
    }

    let mut palette: Vec<Rgba<u8>> = Vec::with_capacity(boxes.len() + 1);
    let transparent_index = has_transparent.then(|| {
        palette.push(Rgba([0, 0, 0, 0]));
        0u8
    });
    let offset = palette.len();
    palette.extend(boxes.iter().map(ColorBox::representative));

    // Nearest visible entry per color; never the transparent slot.
    let mut lookup: HashMap<[u8; 4], u8> = HashMap::with_capacity(entries.len());
    let mut error_sum = 0u64;
    for e in &entries {
        let (best, dist) = palette[offset..]
            .iter()
            .enumerate()
            .map(|(i, p)| (i, l1(e.color, p.0)))
            .min_by_key(|&(_, d)| d)
            .unwrap_or((0, 0));
        error_sum += u64::from(dist) * u64::from(e.count);
        lookup.insert(e.color, u8::try_from(best + offset).unwrap_or(u8::MAX));
    }

    #[allow(clippy::cast_precision_loss)]
    let mean_error = if visible == 0 {
        0.0
    } else {
        error_sum as f64 / (visible as f64 * 4.0)
    };

    if mean_error > max_mean_error(spec.min_quality) {
        let best_quality = quality_for_error(mean_error);
        tracing::debug!(best_quality, colors = palette.len(), "quantization below minimum quality");
        return QuantizeOutcome::Unattainable { best_quality };
    }

    let indices = img
        .pixels()
        .map(|px| {
            if px[3] == 0 {
                transparent_index.unwrap_or(0)
            } else {
                lookup.get(&px.0).copied().unwrap_or(0)
            }
        })
        .collect();

    tracing::debug!(
        colors = palette.len(),
        quality = quality_for_error(mean_error),
        "quantized"
    );

    QuantizeOutcome::Indexed(IndexedImage {
        width: img.width(),
        height: img.height(),
        palette,
        indices,
        transparent_index,
        mean_error,
    })
}

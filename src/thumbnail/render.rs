//! Downscaling and PNG encoding.
//!
//! Downscaling is an exact area average: every output pixel is the mean of
//! the source area it covers, with fractional weights on partially covered
//! source pixels. The filter is separable, so rows are reduced first and
//! columns second.

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::decode::DecodedImage;
use crate::error::RenderError;

/// Output size that fits `width x height` inside a `max x max` box.
///
/// Images already inside the box keep their size.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = max as f64 / width.max(height) as f64;
    let side = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max);
    (side(width), side(height))
}

/// Downscale `image` to fit `max_dimension` and encode it as PNG.
///
/// The sample depth is preserved: 16-bit input produces a 16-bit PNG.
pub fn render(image: &DecodedImage, max_dimension: u32) -> Result<Bytes, RenderError> {
    if max_dimension == 0 {
        return Err(RenderError::InvalidDimension(max_dimension));
    }
    if image.width == 0 || image.height == 0 {
        return Err(RenderError::InvalidDimension(image.width.min(image.height)));
    }
    if image.pixels.len() != image.expected_len() {
        return Err(RenderError::InvalidBuffer {
            expected: image.expected_len(),
            actual: image.pixels.len(),
        });
    }

    let (width, height) = fit_within(image.width, image.height, max_dimension);
    let color = color_type(image)?;

    let pixels = if (width, height) == (image.width, image.height) {
        image.pixels.clone()
    } else {
        area_average(image, width as usize, height as usize)
    };

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&pixels, width, height, color)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(Bytes::from(png))
}

fn color_type(image: &DecodedImage) -> Result<ExtendedColorType, RenderError> {
    let color = match (image.samples_per_pixel, image.bit_depth) {
        (1, 8) => ExtendedColorType::L8,
        (2, 8) => ExtendedColorType::La8,
        (3, 8) => ExtendedColorType::Rgb8,
        (4, 8) => ExtendedColorType::Rgba8,
        (1, 16) => ExtendedColorType::L16,
        (2, 16) => ExtendedColorType::La16,
        (3, 16) => ExtendedColorType::Rgb16,
        (4, 16) => ExtendedColorType::Rgba16,
        (samples, bits) => {
            return Err(RenderError::Encode(format!(
                "no PNG color type for {} samples of {} bits",
                samples, bits
            )))
        }
    };
    Ok(color)
}

/// Source span covered by one output pixel: first index and per-pixel weights.
struct Span {
    start: usize,
    weights: Vec<f32>,
}

/// Spans mapping `source` pixels onto `target` pixels along one axis.
fn spans(source: usize, target: usize) -> Vec<Span> {
    let ratio = source as f64 / target as f64;
    (0..target)
        .map(|i| {
            let from = i as f64 * ratio;
            let to = ((i + 1) as f64 * ratio).min(source as f64);
            let start = from.floor() as usize;
            let end = (to.ceil() as usize).clamp(start + 1, source);
            let weights = (start..end)
                .map(|s| {
                    let covered = (to.min(s as f64 + 1.0) - from.max(s as f64)).max(0.0);
                    (covered / (to - from)) as f32
                })
                .collect();
            Span { start, weights }
        })
        .collect()
}

fn area_average(image: &DecodedImage, target_width: usize, target_height: usize) -> Vec<u8> {
    let width = image.width as usize;
    let height = image.height as usize;
    let samples = image.samples_per_pixel as usize;
    let wide = image.bit_depth == 16;

    let sample = |i: usize| -> f32 {
        if wide {
            u16::from_ne_bytes([image.pixels[i * 2], image.pixels[i * 2 + 1]]) as f32
        } else {
            image.pixels[i] as f32
        }
    };

    // Rows first: height x target_width
    let columns = spans(width, target_width);
    let mut narrowed = vec![0f32; height * target_width * samples];
    for y in 0..height {
        let row = y * width;
        for (x, span) in columns.iter().enumerate() {
            let out = &mut narrowed[(y * target_width + x) * samples..][..samples];
            for (k, &w) in span.weights.iter().enumerate() {
                let px = (row + span.start + k) * samples;
                for (s, acc) in out.iter_mut().enumerate() {
                    *acc += w * sample(px + s);
                }
            }
        }
    }

    // Then columns: target_height x target_width
    let rows = spans(height, target_height);
    let bytes_per_sample = if wide { 2 } else { 1 };
    let mut out = vec![0u8; target_width * target_height * samples * bytes_per_sample];
    let mut acc = vec![0f32; target_width * samples];
    for (y, span) in rows.iter().enumerate() {
        acc.iter_mut().for_each(|v| *v = 0.0);
        for (k, &w) in span.weights.iter().enumerate() {
            let src = &narrowed[(span.start + k) * target_width * samples..][..target_width * samples];
            for (a, &v) in acc.iter_mut().zip(src) {
                *a += w * v;
            }
        }
        let base = y * target_width * samples;
        for (i, &v) in acc.iter().enumerate() {
            let at = base + i;
            if wide {
                let v = v.round().clamp(0.0, u16::MAX as f32) as u16;
                out[at * 2..at * 2 + 2].copy_from_slice(&v.to_ne_bytes());
            } else {
                out[at] = v.round().clamp(0.0, u8::MAX as f32) as u8;
            }
        }
    }
    out
}

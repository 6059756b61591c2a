//! Per-segment decompression.
//!
//! Byte-oriented codecs (none, LZW, Deflate, PackBits) return the raw
//! sample stream; image codecs (JPEG, JPEG 2000) return a small raster with
//! their own dimensions and sample count.

use std::io::{Cursor, Read};

use flate2::read::ZlibDecoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use weezl::{decode::Decoder as LzwDecoder, BitOrder, LzwStatus};

use super::color::ycbcr_pixels_to_rgb;
use crate::format::tiff::Compression;

/// Decoded pixels of one image-codec segment, 8 bits per sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    pub samples: usize,
    pub data: Vec<u8>,
}

/// Decompress a byte-oriented segment.
///
/// `expected` is the size of the uncompressed segment; decoders stop early
/// once it is reached and fail when they produce less.
pub fn decompress(compression: Compression, data: &[u8], expected: usize) -> Result<Vec<u8>, String> {
    let mut out = match compression {
        Compression::None => data.to_vec(),
        Compression::Lzw => decode_lzw(data, expected)?,
        Compression::Deflate | Compression::AdobeDeflate => {
            let mut out = Vec::with_capacity(expected);
            ZlibDecoder::new(data)
                .take(expected as u64)
                .read_to_end(&mut out)
                .map_err(|e| format!("Deflate: {}", e))?;
            out
        }
        Compression::PackBits => unpack_bits(data, expected),
        other => return Err(format!("{} is not a byte-oriented codec", other.name())),
    };

    if out.len() < expected {
        return Err(format!(
            "decompressed to {} bytes, expected {}",
            out.len(),
            expected
        ));
    }
    out.truncate(expected);
    Ok(out)
}

/// LZW decoding into a buffer of exactly `expected` bytes.
fn decode_lzw(data: &[u8], expected: usize) -> Result<Vec<u8>, String> {
    let mut decoder = LzwDecoder::with_tiff_size_switch(BitOrder::Msb, 8);
    let mut out = vec![0u8; expected];
    let (mut read, mut written) = (0, 0);
    while written < expected {
        let result = decoder.decode_bytes(&data[read..], &mut out[written..]);
        read += result.consumed_in;
        written += result.consumed_out;
        match result.status.map_err(|e| format!("LZW: {}", e))? {
            LzwStatus::Ok if result.consumed_in + result.consumed_out > 0 => {}
            _ => break,
        }
    }
    out.truncate(written);
    Ok(out)
}

/// PackBits run-length decoding, stopping once `expected` bytes are produced.
pub fn unpack_bits(data: &[u8], expected: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(expected);
    let mut pos = 0;
    while pos < data.len() && out.len() < expected {
        let header = data[pos] as i8;
        pos += 1;
        match header {
            0..=127 => {
                let n = header as usize + 1;
                let end = (pos + n).min(data.len());
                out.extend_from_slice(&data[pos..end]);
                pos = end;
            }
            -127..=-1 => {
                if let Some(&byte) = data.get(pos) {
                    let n = (-(header as isize)) as usize + 1;
                    out.resize(out.len() + n, byte);
                    pos += 1;
                }
            }
            // -128 is a no-op
            _ => {}
        }
    }
    out
}

/// Decode a complete JPEG stream to 8-bit gray or RGB.
pub fn decode_jpeg(stream: &[u8]) -> Result<Raster, String> {
    let image = ImageReader::with_format(Cursor::new(stream), ImageFormat::Jpeg)
        .decode()
        .map_err(|e| format!("JPEG: {}", e))?;
    Ok(raster_from_dynamic(image))
}

fn raster_from_dynamic(image: DynamicImage) -> Raster {
    let width = image.width() as usize;
    let height = image.height() as usize;
    match image {
        DynamicImage::ImageLuma8(gray) => Raster {
            width,
            height,
            samples: 1,
            data: gray.into_raw(),
        },
        other => Raster {
            width,
            height,
            samples: 3,
            data: other.to_rgb8().into_raw(),
        },
    }
}

/// Decode a JPEG 2000 codestream to 8-bit samples.
///
/// `ycbcr` marks streams whose three components are YCbCr without a
/// codestream-level transform, as written by Aperio (33003).
pub fn decode_jpeg2000(stream: &[u8], ycbcr: bool) -> Result<Raster, String> {
    let image = jpeg2k::Image::from_bytes(stream).map_err(|e| format!("JPEG 2000: {}", e))?;
    let width = image.width() as usize;
    let height = image.height() as usize;
    let components = image.components();
    if components.is_empty() || width == 0 || height == 0 {
        return Err("JPEG 2000: empty image".to_string());
    }

    let samples = if components.len() >= 3 { 3 } else { 1 };
    let mut data = vec![0u8; width * height * samples];
    for (c, component) in components.iter().take(samples).enumerate() {
        let cw = component.width() as usize;
        let ch = component.height() as usize;
        let values = component.data();
        if cw == 0 || ch == 0 || values.len() < cw * ch {
            return Err(format!("JPEG 2000: component {} is truncated", c));
        }
        let shift = component.precision().saturating_sub(8);
        let max = if component.precision() >= 8 {
            255
        } else {
            (1i32 << component.precision()) - 1
        };
        for y in 0..height {
            // Subsampled components are stretched to the full grid
            let sy = (y * ch / height).min(ch - 1);
            for x in 0..width {
                let sx = (x * cw / width).min(cw - 1);
                let v = values[sy * cw + sx] >> shift;
                data[(y * width + x) * samples + c] = v.clamp(0, max) as u8;
            }
        }
    }

    if ycbcr && samples == 3 {
        ycbcr_pixels_to_rgb(&mut data);
    }
    Ok(Raster {
        width,
        height,
        samples,
        data,
    })
}

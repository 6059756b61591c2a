//! Sample post-processing: predictor undo, byte order, YCbCr and MinIsWhite.
//!
//! All routines work in place on interleaved rows unless noted.

/// Swap 16-bit samples from file order to native order.
pub fn to_native_u16(data: &mut [u8], file_is_native: bool) {
    if file_is_native {
        return;
    }
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Undo horizontal differencing (predictor 2) on 8-bit rows.
///
/// `stride` is the number of interleaved samples per pixel.
pub fn undo_predictor_u8(data: &mut [u8], row_samples: usize, stride: usize) {
    if row_samples == 0 {
        return;
    }
    for row in data.chunks_exact_mut(row_samples) {
        for i in stride..row.len() {
            row[i] = row[i].wrapping_add(row[i - stride]);
        }
    }
}

/// Undo horizontal differencing on native-order 16-bit rows.
pub fn undo_predictor_u16(data: &mut [u8], row_samples: usize, stride: usize) {
    let row_bytes = row_samples * 2;
    if row_bytes == 0 {
        return;
    }
    for row in data.chunks_exact_mut(row_bytes) {
        for i in stride..row_samples {
            let prev = u16::from_ne_bytes([row[(i - stride) * 2], row[(i - stride) * 2 + 1]]);
            let cur = u16::from_ne_bytes([row[i * 2], row[i * 2 + 1]]);
            row[i * 2..i * 2 + 2].copy_from_slice(&cur.wrapping_add(prev).to_ne_bytes());
        }
    }
}

/// Invert MinIsWhite samples so that 0 is black.
pub fn invert(data: &mut [u8], bit_depth: u8) {
    if bit_depth == 16 {
        for pair in data.chunks_exact_mut(2) {
            let v = u16::MAX - u16::from_ne_bytes([pair[0], pair[1]]);
            pair.copy_from_slice(&v.to_ne_bytes());
        }
    } else {
        for v in data.iter_mut() {
            *v = u8::MAX - *v;
        }
    }
}

/// BT.601 full-range YCbCr to RGB.
#[inline]
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;
    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

#[inline]
fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Convert interleaved 8-bit YCbCr pixels to RGB in place.
pub fn ycbcr_pixels_to_rgb(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        let rgb = ycbcr_to_rgb(px[0], px[1], px[2]);
        px.copy_from_slice(&rgb);
    }
}

/// Expand a chroma-subsampled YCbCr segment into interleaved RGB.
///
/// The segment is stored as data units of `h * v` luma samples followed by
/// one Cb and one Cr sample, covering `width x height` pixels rounded up
/// to whole units. Returns `None` when `data` is too short.
pub fn subsampled_ycbcr_to_rgb(
    data: &[u8],
    width: usize,
    height: usize,
    h: usize,
    v: usize,
) -> Option<Vec<u8>> {
    let units_across = width.div_ceil(h);
    let units_down = height.div_ceil(v);
    let unit_len = h * v + 2;
    if data.len() < units_across * units_down * unit_len {
        return None;
    }

    let mut rgb = vec![0u8; width * height * 3];
    for uy in 0..units_down {
        for ux in 0..units_across {
            let unit = &data[(uy * units_across + ux) * unit_len..][..unit_len];
            let cb = unit[h * v];
            let cr = unit[h * v + 1];
            for dy in 0..v {
                let y = uy * v + dy;
                if y >= height {
                    break;
                }
                for dx in 0..h {
                    let x = ux * h + dx;
                    if x >= width {
                        break;
                    }
                    let px = ycbcr_to_rgb(unit[dy * h + dx], cb, cr);
                    rgb[(y * width + x) * 3..][..3].copy_from_slice(&px);
                }
            }
        }
    }
    Some(rgb)
}

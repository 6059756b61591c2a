//! JPEG stream preparation for TIFF segments.
//!
//! # Abbreviated streams
//!
//! TIFF writers commonly store the quantization (DQT) and Huffman (DHT)
//! tables once, in the page's `JPEGTables` tag, and leave them out of each
//! strip or tile. Such a segment is an "abbreviated" stream: SOI followed
//! directly by frame and scan data. Before handing it to a decoder the
//! tables are spliced in:
//!
//! ```text
//! tables:  SOI DQT DHT ... EOI
//! segment: SOI SOF SOS <entropy data> EOI
//! merged:  SOI DQT DHT ... SOF SOS <entropy data> EOI
//! ```
//!
//! # RGB streams
//!
//! Some scanners write JPEG segments whose components are R, G, B rather
//! than Y, Cb, Cr, and signal it only through the TIFF photometric tag.
//! Decoders guess YCbCr for three-component streams unless an Adobe APP14
//! segment says otherwise, so one is injected with transform 0.

use bytes::{BufMut, Bytes, BytesMut};

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Define Huffman Table marker
pub const DHT: [u8; 2] = [0xFF, 0xC4];

/// Define Quantization Table marker
pub const DQT: [u8; 2] = [0xFF, 0xDB];

/// Start Of Scan marker
pub const SOS: [u8; 2] = [0xFF, 0xDA];

/// Application segment 14 (Adobe) marker
pub const APP14: [u8; 2] = [0xFF, 0xEE];

/// Adobe APP14 segment declaring untransformed (RGB) components.
const ADOBE_RGB_SEGMENT: [u8; 16] = [
    0xFF, 0xEE, // APP14
    0x00, 0x0E, // length 14
    b'A', b'd', b'o', b'b', b'e', //
    0x00, 0x64, // version 100
    0x00, 0x00, // flags0
    0x00, 0x00, // flags1
    0x00, // transform: none
];

/// Markers that precede the first scan, as `(marker, segment start)`.
///
/// Stops at SOS or at the first byte that isn't a marker; standalone
/// markers (SOI, EOI, RSTn, TEM) carry no length.
fn header_markers(data: &[u8]) -> Vec<([u8; 2], usize)> {
    let mut markers = Vec::new();
    if data.len() < 2 || data[0..2] != SOI {
        return markers;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            break;
        }
        let code = data[pos + 1];
        if code == 0xFF {
            // Fill byte
            pos += 1;
            continue;
        }
        let marker = [0xFF, code];
        markers.push((marker, pos));
        if marker == SOS {
            break;
        }

        let standalone = matches!(code, 0x01 | 0xD0..=0xD9);
        if standalone {
            pos += 2;
        } else if pos + 3 < data.len() {
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 2 + length;
        } else {
            break;
        }
    }
    markers
}

/// Whether the stream carries its own quantization tables.
pub fn has_tables(data: &[u8]) -> bool {
    header_markers(data).iter().any(|(m, _)| *m == DQT)
}

/// Whether the stream reaches its scan without any DQT or DHT segment.
pub fn is_abbreviated(data: &[u8]) -> bool {
    let markers = header_markers(data);
    let reaches_scan = markers.iter().any(|(m, _)| *m == SOS);
    reaches_scan && !markers.iter().any(|(m, _)| *m == DQT || *m == DHT)
}

/// Whether an Adobe APP14 segment is already present.
fn has_adobe_segment(data: &[u8]) -> bool {
    header_markers(data).iter().any(|&(m, at)| {
        m == APP14 && data.get(at + 4..at + 9) == Some(&b"Adobe"[..])
    })
}

/// Splice `tables` in front of the segment's frame and scan data.
///
/// `tables` is `SOI ... EOI`; its EOI is dropped, and so is the segment's
/// SOI. Either side missing its delimiter is tolerated.
pub fn merge_tables(tables: &[u8], segment: &[u8]) -> Bytes {
    let tables_body = tables.strip_suffix(&EOI[..]).unwrap_or(tables);
    let segment_body = segment.strip_prefix(&SOI[..]).unwrap_or(segment);

    let mut out = BytesMut::with_capacity(tables_body.len() + segment_body.len() + 2);
    if !tables_body.starts_with(&SOI) {
        out.put_slice(&SOI);
    }
    out.put_slice(tables_body);
    out.put_slice(segment_body);
    out.freeze()
}

/// Insert an Adobe APP14 segment with transform 0 right after SOI.
pub fn mark_rgb(data: &[u8]) -> Bytes {
    if data.len() < 2 || data[0..2] != SOI || has_adobe_segment(data) {
        return Bytes::copy_from_slice(data);
    }
    let mut out = BytesMut::with_capacity(data.len() + ADOBE_RGB_SEGMENT.len());
    out.put_slice(&SOI);
    out.put_slice(&ADOBE_RGB_SEGMENT);
    out.put_slice(&data[2..]);
    out.freeze()
}

/// Turn one compressed segment into a self-contained JPEG stream.
///
/// Tables are merged when the page has them and the segment lacks its own;
/// `rgb` marks streams whose components are not YCbCr.
pub fn prepare_segment(tables: Option<&[u8]>, segment: &[u8], rgb: bool) -> Bytes {
    let complete = match tables {
        Some(tables) if !tables.is_empty() && !has_tables(segment) => {
            merge_tables(tables, segment)
        }
        _ => Bytes::copy_from_slice(segment),
    };
    if rgb {
        mark_rgb(&complete)
    } else {
        complete
    }
}

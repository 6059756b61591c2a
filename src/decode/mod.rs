//! Strip and tile decoding.
//!
//! Decoding a page happens in two steps so the CPU-bound part can run off
//! the async runtime:
//!
//! 1. [`fetch_page`] validates the page layout, resolves the segment tables
//!    and pulls every compressed segment through coalesced range reads.
//! 2. [`FetchedPage::decode`] decompresses each segment, undoes predictors
//!    and color encodings, and assembles one interleaved raster.

mod codec;
mod color;
mod jpeg;
mod layout;

use bytes::Bytes;
use tracing::debug;

use crate::error::{DecodeError, TiffError};
use crate::format::tiff::{Compression, DirectoryIndex, Photometric, PlanarConfig, TiffTag};
use crate::format::ThumbnailCandidate;
use crate::io::{fetch_coalesced, ByteRange, CoalescePolicy, RangeReader, DEFAULT_MAX_IN_FLIGHT};

pub use codec::{decode_jpeg, decode_jpeg2000, decompress, unpack_bits, Raster};
pub use jpeg::{is_abbreviated, merge_tables, prepare_segment};
pub use layout::{Canvas, Organization, PageLayout, Placement};

/// Largest decoded raster accepted by default (512 MiB).
pub const DEFAULT_MAX_DECODED_BYTES: usize = 512 * 1024 * 1024;

/// Limits applied while fetching and decoding a page.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub max_in_flight: usize,
    pub coalesce: CoalescePolicy,
    pub max_decoded_bytes: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            coalesce: CoalescePolicy::default(),
            max_decoded_bytes: DEFAULT_MAX_DECODED_BYTES,
        }
    }
}

/// A decoded page: interleaved, row-major, 16-bit samples in native order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u8,
    pub bit_depth: u8,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn bytes_per_pixel(&self) -> usize {
        self.samples_per_pixel as usize * (self.bit_depth as usize / 8)
    }

    /// Buffer size implied by the dimensions and pixel format.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel()
    }
}

/// A page whose compressed segments are in memory.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub layout: PageLayout,
    pub jpeg_tables: Option<Bytes>,
    pub segments: Vec<Bytes>,
}

/// Validate the candidate page and fetch all of its segments.
pub async fn fetch_page<R>(
    index: &DirectoryIndex,
    candidate: &ThumbnailCandidate,
    reader: &R,
    options: &DecodeOptions,
) -> Result<FetchedPage, DecodeError>
where
    R: RangeReader + ?Sized,
{
    let page = candidate.page_index;
    let ifd = index.page(page).ok_or_else(|| DecodeError::UnsupportedLayout {
        page,
        message: "page does not exist".to_string(),
    })?;
    let layout = PageLayout::from_ifd(ifd, index.header.byte_order)?;

    let too_large = DecodeError::ImageTooLarge {
        width: layout.width,
        height: layout.height,
        limit: options.max_decoded_bytes,
    };
    match layout.decoded_bytes() {
        Some(n) if n <= options.max_decoded_bytes => {}
        _ => return Err(too_large),
    }

    let table_error = |message: String| DecodeError::SegmentTable { page, message };
    // Each segment is decompressed into its own buffer before placement
    match layout.full_segment_bytes() {
        Some(n) if n <= options.max_decoded_bytes => {}
        _ => {
            let (w, h) = layout.segment_size();
            return Err(table_error(format!(
                "{}x{} segments exceed the {} byte decode limit",
                w, h, options.max_decoded_bytes
            )));
        }
    }

    let (offsets_tag, counts_tag) = match layout.organization {
        Organization::Tiles { .. } => (TiffTag::TileOffsets, TiffTag::TileByteCounts),
        Organization::Strips { .. } => (TiffTag::StripOffsets, TiffTag::StripByteCounts),
    };
    let missing = |tag: TiffTag| DecodeError::Tiff(TiffError::MissingTag { tag: tag.name(), page });

    let offsets = ifd
        .resolve(reader, &index.header, offsets_tag)
        .await?
        .and_then(|v| v.as_u64_slice().map(<[u64]>::to_vec))
        .ok_or_else(|| missing(offsets_tag))?;
    let counts = ifd
        .resolve(reader, &index.header, counts_tag)
        .await?
        .and_then(|v| v.as_u64_slice().map(<[u64]>::to_vec))
        .ok_or_else(|| missing(counts_tag))?;

    let expected = layout.segment_count();
    if offsets.len() != expected || counts.len() != expected {
        return Err(table_error(format!(
            "{} offsets and {} byte counts for {} segments",
            offsets.len(),
            counts.len(),
            expected
        )));
    }

    let size = reader.size();
    let mut ranges = Vec::with_capacity(expected);
    for (i, (&offset, &count)) in offsets.iter().zip(&counts).enumerate() {
        if count == 0 {
            return Err(table_error(format!("segment {} has a zero byte count", i)));
        }
        if offset.checked_add(count).map_or(true, |end| end > size) {
            return Err(table_error(format!(
                "segment {} ({} bytes at {}) runs past end of file",
                i, count, offset
            )));
        }
        ranges.push(ByteRange::new(offset, count));
    }

    let jpeg_tables = if layout.compression == Compression::Jpeg {
        ifd.resolve(reader, &index.header, TiffTag::JpegTables)
            .await?
            .and_then(|v| v.to_bytes())
    } else {
        None
    };

    let segments = fetch_coalesced(reader, &ranges, options.coalesce, options.max_in_flight).await?;
    debug!(
        "Fetched {} {} segments of page {} ({}x{}, {} bytes)",
        segments.len(),
        layout.compression.name(),
        page,
        layout.width,
        layout.height,
        counts.iter().sum::<u64>()
    );

    Ok(FetchedPage {
        layout,
        jpeg_tables,
        segments,
    })
}

/// Fetch and decode a page in one call.
pub async fn decode<R>(
    index: &DirectoryIndex,
    candidate: &ThumbnailCandidate,
    reader: &R,
    options: &DecodeOptions,
) -> Result<DecodedImage, DecodeError>
where
    R: RangeReader + ?Sized,
{
    fetch_page(index, candidate, reader, options).await?.decode()
}

/// One decoded segment before placement.
struct SegmentPixels {
    data: Vec<u8>,
    width: usize,
    height: usize,
    samples: usize,
}

impl FetchedPage {
    /// Decode every segment and assemble the page. CPU-bound.
    pub fn decode(self) -> Result<DecodedImage, DecodeError> {
        let layout = &self.layout;
        let samples = layout.output_samples();
        let mut canvas = Canvas::new(
            layout.width as usize,
            layout.height as usize,
            samples,
            layout.bytes_per_sample(),
        );
        let plane_of = |placement: &Placement| match layout.planar {
            PlanarConfig::Planar => Some(placement.plane),
            PlanarConfig::Chunky => None,
        };

        for (index, segment) in self.segments.iter().enumerate() {
            let placement = layout.placement(index);
            let pixels = self
                .decode_segment(segment, &placement)
                .map_err(|message| DecodeError::Segment { index, message })?;
            canvas.blit(
                &pixels.data,
                pixels.width,
                pixels.height,
                pixels.samples,
                &placement,
                plane_of(&placement),
            );
        }

        if layout.photometric == Photometric::MinIsWhite {
            color::invert(&mut canvas.data, layout.bits_per_sample as u8);
        }

        Ok(DecodedImage {
            width: layout.width,
            height: layout.height,
            samples_per_pixel: samples as u8,
            bit_depth: layout.bits_per_sample as u8,
            pixels: canvas.data,
        })
    }

    fn decode_segment(&self, segment: &[u8], placement: &Placement) -> Result<SegmentPixels, String> {
        let layout = &self.layout;
        let raster = match layout.compression {
            Compression::Jpeg => {
                let rgb = layout.photometric == Photometric::Rgb;
                let stream = jpeg::prepare_segment(self.jpeg_tables.as_deref(), segment, rgb);
                Some(codec::decode_jpeg(&stream)?)
            }
            Compression::Jpeg2000YCbCr => Some(codec::decode_jpeg2000(segment, true)?),
            Compression::Jpeg2000Rgb => Some(codec::decode_jpeg2000(segment, false)?),
            Compression::Jpeg2000 => Some(codec::decode_jpeg2000(
                segment,
                layout.photometric == Photometric::YCbCr,
            )?),
            _ => None,
        };
        if let Some(raster) = raster {
            return Ok(SegmentPixels {
                data: raster.data,
                width: raster.width,
                height: raster.height,
                samples: raster.samples,
            });
        }

        let width = placement.encoded_width as usize;
        let height = placement.encoded_height as usize;
        let expected = layout
            .raw_segment_bytes(placement)
            .ok_or_else(|| "segment size overflows".to_string())?;
        let mut data = codec::decompress(layout.compression, segment, expected)?;

        if layout.is_subsampled_ycbcr() {
            let (h, v) = (layout.subsampling.0 as usize, layout.subsampling.1 as usize);
            let rgb = color::subsampled_ycbcr_to_rgb(&data, width, height, h, v)
                .ok_or_else(|| "subsampled YCbCr data is truncated".to_string())?;
            return Ok(SegmentPixels {
                data: rgb,
                width,
                height,
                samples: 3,
            });
        }

        let samples = layout.segment_samples();
        let row_samples = width * samples;
        if layout.bits_per_sample == 16 {
            color::to_native_u16(&mut data, layout.byte_order.is_native());
            if layout.predictor == 2 {
                color::undo_predictor_u16(&mut data, row_samples, samples);
            }
        } else if layout.predictor == 2 {
            color::undo_predictor_u8(&mut data, row_samples, samples);
        }
        if layout.is_raw_ycbcr() {
            color::ycbcr_pixels_to_rgb(&mut data);
        }

        Ok(SegmentPixels {
            data,
            width,
            height,
            samples,
        })
    }
}

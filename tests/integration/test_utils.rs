//! Test utilities for integration tests.
//!
//! This module provides:
//! - In-memory range readers that count requests and bytes
//! - A mock slide source keyed by URL, with optional ETags and credentials
//! - A builder for classic and BigTIFF files in either byte order

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageEncoder, RgbImage};

use wsi_thumbnailer::error::IoError;
use wsi_thumbnailer::io::{check_range, RangeReader};
use wsi_thumbnailer::source::{RemoteSource, SlideSource};

// =============================================================================
// Tracking Mock Reader
// =============================================================================

/// Counters shared by every reader a [`MockSlideSource`] opens.
#[derive(Debug, Clone, Default)]
pub struct ReadStats {
    requests: Arc<AtomicUsize>,
    bytes: Arc<AtomicU64>,
}

impl ReadStats {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

/// Mock range reader that records how much it was asked for.
#[derive(Clone)]
pub struct TrackingMockReader {
    data: Bytes,
    identifier: String,
    etag: Option<String>,
    stats: ReadStats,
}

impl TrackingMockReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
            etag: None,
            stats: ReadStats::default(),
        }
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    pub fn with_stats(mut self, stats: ReadStats) -> Self {
        self.stats = stats;
        self
    }
}

#[async_trait]
impl RangeReader for TrackingMockReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.stats.requests.fetch_add(1, Ordering::SeqCst);
        check_range(offset, len, self.data.len() as u64)?;
        self.stats.bytes.fetch_add(len as u64, Ordering::SeqCst);
        Ok(self.data.slice(offset as usize..offset as usize + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn content_identity(&self) -> Option<&str> {
        self.etag.as_deref()
    }
}

// =============================================================================
// Mock Slide Source
// =============================================================================

struct MockSlide {
    data: Bytes,
    etag: Option<String>,
    authorization: Option<String>,
}

/// Slide source serving in-memory files by URL (query string ignored).
#[derive(Clone, Default)]
pub struct MockSlideSource {
    slides: Arc<HashMap<String, MockSlide>>,
    opens: Arc<AtomicUsize>,
    stats: ReadStats,
}

impl MockSlideSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(mut self, url: &str, slide: MockSlide) -> Self {
        let mut slides = match Arc::try_unwrap(self.slides) {
            Ok(slides) => slides,
            Err(_) => panic!("MockSlideSource configured after being shared"),
        };
        slides.insert(url.to_string(), slide);
        self.slides = Arc::new(slides);
        self
    }

    /// Serve `data` at `url` without an ETag.
    pub fn with_slide(self, url: &str, data: Vec<u8>) -> Self {
        self.insert(
            url,
            MockSlide {
                data: Bytes::from(data),
                etag: None,
                authorization: None,
            },
        )
    }

    /// Serve `data` at `url` with an ETag, making its directory cacheable.
    pub fn with_tagged_slide(self, url: &str, data: Vec<u8>, etag: &str) -> Self {
        self.insert(
            url,
            MockSlide {
                data: Bytes::from(data),
                etag: Some(etag.to_string()),
                authorization: None,
            },
        )
    }

    /// Serve `data` at `url` only to requests carrying `authorization`.
    pub fn with_private_slide(self, url: &str, data: Vec<u8>, authorization: &str) -> Self {
        self.insert(
            url,
            MockSlide {
                data: Bytes::from(data),
                etag: None,
                authorization: Some(authorization.to_string()),
            },
        )
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Read counters across every opened reader.
    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }
}

#[async_trait]
impl SlideSource for MockSlideSource {
    type Reader = TrackingMockReader;

    async fn open(&self, source: &RemoteSource) -> Result<Self::Reader, IoError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let identity = source.cache_identity();

        let slide = self
            .slides
            .get(&identity)
            .ok_or_else(|| IoError::NotFound(identity.clone()))?;

        if let Some(expected) = &slide.authorization {
            if source.authorization() != Some(expected.as_str()) {
                return Err(IoError::PermissionDenied(format!("{}: 403", identity)));
            }
        }

        Ok(TrackingMockReader::new(slide.data.clone(), identity)
            .with_etag(slide.etag.clone())
            .with_stats(self.stats.clone()))
    }
}

// =============================================================================
// Pixel Patterns
// =============================================================================

/// Deterministic RGB pattern: red follows x, green follows y.
pub fn rgb_pattern(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(2).saturating_sub(1)).min(255) as u8,
            (y * 255 / height.max(2).saturating_sub(1)).min(255) as u8,
            128,
        ])
    })
}

/// Encode an RGB image as a baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
    buf
}

/// Check if data is a valid PNG (signature check).
pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
}

/// Decode a PNG body into its dimensions and color type.
pub fn png_info(data: &[u8]) -> (u32, u32, image::ColorType) {
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Png).unwrap();
    (image.width(), image.height(), image.color())
}

// =============================================================================
// TIFF File Builder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrderType {
    LittleEndian,
    BigEndian,
}

/// Pixel storage of a page.
#[derive(Debug, Clone)]
pub enum PageData {
    /// Uncompressed RGB in strips of `rows_per_strip` rows
    RawStrips { rows_per_strip: u32 },
    /// JPEG-compressed (YCbCr) tiles
    JpegTiles { tile_size: u32, quality: u8 },
    /// Tile table only; the offsets point past the end of the file, so the
    /// page parses but can never be decoded
    Unread { tile_size: u32 },
}

/// One directory of a test TIFF.
#[derive(Debug, Clone)]
pub struct TestPage {
    pub width: u32,
    pub height: u32,
    pub data: PageData,
    pub new_subfile_type: Option<u32>,
    pub description: Option<String>,
    pub make: Option<String>,
    pub software: Option<String>,
}

impl TestPage {
    pub fn strips(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: PageData::RawStrips {
                rows_per_strip: 16,
            },
            new_subfile_type: None,
            description: None,
            make: None,
            software: None,
        }
    }

    pub fn jpeg_tiles(width: u32, height: u32, tile_size: u32) -> Self {
        Self {
            data: PageData::JpegTiles {
                tile_size,
                quality: 90,
            },
            ..Self::strips(width, height)
        }
    }

    /// A page too large to fetch in tests; only its directory is readable.
    pub fn placeholder(width: u32, height: u32) -> Self {
        Self {
            data: PageData::Unread { tile_size: 256 },
            ..Self::strips(width, height)
        }
    }

    pub fn reduced(mut self) -> Self {
        self.new_subfile_type = Some(1);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn make(mut self, make: &str) -> Self {
        self.make = Some(make.to_string());
        self
    }

    pub fn software(mut self, software: &str) -> Self {
        self.software = Some(software.to_string());
        self
    }
}

/// A directory entry before serialization: values already in file byte order.
struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    payload: Vec<u8>,
}

/// Builder for test TIFF and BigTIFF files.
///
/// Pixel segments are written first, then each directory's out-of-line
/// values and the directory itself, so directories follow their data.
pub struct TiffBuilder {
    byte_order: ByteOrderType,
    is_bigtiff: bool,
    pages: Vec<TestPage>,
    padding: usize,
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self {
            byte_order: ByteOrderType::LittleEndian,
            is_bigtiff: false,
            pages: Vec::new(),
            padding: 0,
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrderType) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_bigtiff(mut self, is_bigtiff: bool) -> Self {
        self.is_bigtiff = is_bigtiff;
        self
    }

    pub fn add_page(mut self, page: TestPage) -> Self {
        self.pages.push(page);
        self
    }

    /// Zero bytes appended after the last directory, to model large files.
    pub fn with_padding(mut self, bytes: usize) -> Self {
        self.padding = bytes;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut data = Vec::new();
        match self.byte_order {
            ByteOrderType::LittleEndian => data.extend_from_slice(b"II"),
            ByteOrderType::BigEndian => data.extend_from_slice(b"MM"),
        }
        let first_offset_at = if self.is_bigtiff {
            self.put_u16(&mut data, 43);
            self.put_u16(&mut data, 8);
            self.put_u16(&mut data, 0);
            self.put_u64(&mut data, 0);
            8
        } else {
            self.put_u16(&mut data, 42);
            self.put_u32(&mut data, 0);
            4
        };

        let mut next_pointer_at = first_offset_at;
        for page in &self.pages {
            let (offsets, counts) = self.write_segments(&mut data, page);
            let entries = self.page_entries(page, &offsets, &counts);
            let ifd_offset = self.write_ifd(&mut data, entries);
            self.patch_offset(&mut data, next_pointer_at, ifd_offset);
            next_pointer_at = data.len() - self.offset_size();
        }

        data.resize(data.len() + self.padding, 0);
        data
    }

    fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    fn align(data: &mut Vec<u8>) {
        if data.len() % 2 == 1 {
            data.push(0);
        }
    }

    fn write_segments(&self, data: &mut Vec<u8>, page: &TestPage) -> (Vec<u64>, Vec<u64>) {
        let pattern = rgb_pattern(page.width, page.height);
        let mut offsets = Vec::new();
        let mut counts = Vec::new();

        match page.data {
            PageData::RawStrips { rows_per_strip } => {
                let row_bytes = page.width as usize * 3;
                for chunk in pattern.as_raw().chunks(row_bytes * rows_per_strip as usize) {
                    Self::align(data);
                    offsets.push(data.len() as u64);
                    counts.push(chunk.len() as u64);
                    data.extend_from_slice(chunk);
                }
            }
            PageData::JpegTiles { tile_size, quality } => {
                for ty in (0..page.height).step_by(tile_size as usize) {
                    for tx in (0..page.width).step_by(tile_size as usize) {
                        // Edge tiles are full size, padded with black
                        let tile = RgbImage::from_fn(tile_size, tile_size, |x, y| {
                            let (px, py) = (tx + x, ty + y);
                            if px < page.width && py < page.height {
                                *pattern.get_pixel(px, py)
                            } else {
                                image::Rgb([0, 0, 0])
                            }
                        });
                        let jpeg = encode_jpeg(&tile, quality);
                        Self::align(data);
                        offsets.push(data.len() as u64);
                        counts.push(jpeg.len() as u64);
                        data.extend_from_slice(&jpeg);
                    }
                }
            }
            PageData::Unread { tile_size } => {
                let across = page.width.div_ceil(tile_size) as u64;
                let down = page.height.div_ceil(tile_size) as u64;
                for i in 0..across * down {
                    offsets.push(u32::MAX as u64 - 1 - i);
                    counts.push(1);
                }
            }
        }
        (offsets, counts)
    }

    fn page_entries(&self, page: &TestPage, offsets: &[u64], counts: &[u64]) -> Vec<Entry> {
        let mut entries = vec![
            self.long(256, page.width),
            self.long(257, page.height),
            self.shorts(258, &[8, 8, 8]),
            self.shorts(277, &[3]),
        ];
        if let Some(kind) = page.new_subfile_type {
            entries.push(self.long(254, kind));
        }
        let offset_array = |tag: u16, values: &[u64]| {
            if self.is_bigtiff {
                self.long8s(tag, values)
            } else {
                let values: Vec<u32> = values.iter().map(|&v| v as u32).collect();
                self.longs(tag, &values)
            }
        };

        match page.data {
            PageData::RawStrips { rows_per_strip } => {
                entries.push(self.shorts(259, &[1]));
                entries.push(self.shorts(262, &[2]));
                entries.push(self.long(278, rows_per_strip));
                entries.push(offset_array(273, offsets));
                entries.push(offset_array(279, counts));
            }
            PageData::JpegTiles { tile_size, .. } | PageData::Unread { tile_size } => {
                entries.push(self.shorts(259, &[7]));
                entries.push(self.shorts(262, &[6]));
                entries.push(self.long(322, tile_size));
                entries.push(self.long(323, tile_size));
                entries.push(offset_array(324, offsets));
                entries.push(offset_array(325, counts));
            }
        }

        let texts = [(270, &page.description), (271, &page.make), (305, &page.software)];
        for (tag, text) in texts {
            if let Some(text) = text {
                let mut payload = text.as_bytes().to_vec();
                payload.push(0);
                entries.push(Entry {
                    tag,
                    field_type: 2,
                    count: payload.len() as u64,
                    payload,
                });
            }
        }

        entries.sort_by_key(|e| e.tag);
        entries
    }

    /// Write out-of-line values, then the directory. Returns the directory offset.
    fn write_ifd(&self, data: &mut Vec<u8>, entries: Vec<Entry>) -> u64 {
        let inline = self.offset_size();
        let mut values = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.payload.len() <= inline {
                let mut field = entry.payload.clone();
                field.resize(inline, 0);
                values.push(field);
            } else {
                Self::align(data);
                let at = data.len() as u64;
                data.extend_from_slice(&entry.payload);
                let mut field = Vec::new();
                self.put_offset(&mut field, at);
                values.push(field);
            }
        }

        Self::align(data);
        let ifd_offset = data.len() as u64;
        if self.is_bigtiff {
            self.put_u64(data, entries.len() as u64);
        } else {
            self.put_u16(data, entries.len() as u16);
        }
        for (entry, field) in entries.iter().zip(values) {
            self.put_u16(data, entry.tag);
            self.put_u16(data, entry.field_type);
            if self.is_bigtiff {
                self.put_u64(data, entry.count);
            } else {
                self.put_u32(data, entry.count as u32);
            }
            data.extend_from_slice(&field);
        }
        self.put_offset(data, 0);
        ifd_offset
    }

    fn patch_offset(&self, data: &mut [u8], at: usize, value: u64) {
        let mut field = Vec::new();
        self.put_offset(&mut field, value);
        data[at..at + field.len()].copy_from_slice(&field);
    }

    fn long(&self, tag: u16, value: u32) -> Entry {
        self.longs(tag, &[value])
    }

    fn shorts(&self, tag: u16, values: &[u16]) -> Entry {
        let mut payload = Vec::new();
        for &v in values {
            self.put_u16(&mut payload, v);
        }
        Entry {
            tag,
            field_type: 3,
            count: values.len() as u64,
            payload,
        }
    }

    fn longs(&self, tag: u16, values: &[u32]) -> Entry {
        let mut payload = Vec::new();
        for &v in values {
            self.put_u32(&mut payload, v);
        }
        Entry {
            tag,
            field_type: 4,
            count: values.len() as u64,
            payload,
        }
    }

    fn long8s(&self, tag: u16, values: &[u64]) -> Entry {
        let mut payload = Vec::new();
        for &v in values {
            self.put_u64(&mut payload, v);
        }
        Entry {
            tag,
            field_type: 16,
            count: values.len() as u64,
            payload,
        }
    }

    fn put_offset(&self, data: &mut Vec<u8>, value: u64) {
        if self.is_bigtiff {
            self.put_u64(data, value);
        } else {
            self.put_u32(data, value as u32);
        }
    }

    fn put_u16(&self, data: &mut Vec<u8>, value: u16) {
        match self.byte_order {
            ByteOrderType::LittleEndian => data.extend_from_slice(&value.to_le_bytes()),
            ByteOrderType::BigEndian => data.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn put_u32(&self, data: &mut Vec<u8>, value: u32) {
        match self.byte_order {
            ByteOrderType::LittleEndian => data.extend_from_slice(&value.to_le_bytes()),
            ByteOrderType::BigEndian => data.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn put_u64(&self, data: &mut Vec<u8>, value: u64) {
        match self.byte_order {
            ByteOrderType::LittleEndian => data.extend_from_slice(&value.to_le_bytes()),
            ByteOrderType::BigEndian => data.extend_from_slice(&value.to_be_bytes()),
        }
    }
}

impl Default for TiffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Slide Fixtures
// =============================================================================

/// Aperio description of the base page.
pub const APERIO_DESCRIPTION: &str = "Aperio Image Library v12.0.15\r\n\
    46000x32914 [0,100 46000x32814] (256x256) JPEG/RGB Q=70\
    |AppMag = 20|StripeWidth = 2040|ScanScope ID = SS1234|MPP = 0.4990";

/// Aperio-style slide: placeholder base, strip thumbnail, label, macro.
pub fn aperio_slide() -> Vec<u8> {
    TiffBuilder::new()
        .add_page(TestPage::placeholder(46000, 32914).describe(APERIO_DESCRIPTION))
        .add_page(
            TestPage::strips(200, 150)
                .describe("Aperio Image Library v12.0.15\r\n46000x32914 -> 200x150 - "),
        )
        .add_page(TestPage::strips(120, 80).describe("Aperio Image Library v12.0.15\r\nlabel 387x463"))
        .add_page(TestPage::strips(160, 60).describe("Aperio Image Library v12.0.15\r\nmacro 1280x431"))
        .build()
}

/// Pyramid of `levels` JPEG-tiled pages halving from `width`x`height`,
/// with no page flagged as reduced resolution.
pub fn jpeg_pyramid(width: u32, height: u32, levels: u32) -> Vec<u8> {
    let mut builder = TiffBuilder::new();
    for level in 0..levels {
        let scale = 1 << level;
        builder = builder.add_page(TestPage::jpeg_tiles(width / scale, height / scale, 64));
    }
    builder.build()
}

/// Plain RGB strip image, handy for API tests.
pub fn small_rgb_slide(width: u32, height: u32) -> Vec<u8> {
    TiffBuilder::new()
        .add_page(TestPage::strips(width, height))
        .build()
}

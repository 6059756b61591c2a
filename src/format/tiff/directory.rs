//! IFD chain walking.
//!
//! [`DirectoryParser::parse`] reads the header, follows the next-IFD
//! pointers and resolves the tags needed for page selection, decoding and
//! metadata. Out-of-line values of one directory are fetched together
//! through coalesced reads. Text is capped and oversized arrays are left
//! for [`Ifd::resolve`] so that parsing a directory never pulls in
//! megabytes of tile tables.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::error::TiffError;
use crate::io::{fetch_coalesced, ByteRange, CoalescePolicy, RangeReader, DEFAULT_MAX_IN_FLIGHT};

use super::parser::{IfdEntry, RawIfd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::{FieldType, TiffTag};
use super::values::{TagValue, ValueReader};

/// Maximum number of directories followed in one file.
pub const MAX_PAGES: usize = 256;

/// Maximum number of entries accepted in one directory.
pub const MAX_IFD_ENTRIES: u64 = 4096;

/// Text values longer than this are truncated when read eagerly.
pub const MAX_EAGER_TEXT_BYTES: u64 = 64 * 1024;

/// Non-text values larger than this are deferred to on-demand reads.
pub const MAX_EAGER_ARRAY_BYTES: u64 = 64 * 1024;

/// Tags resolved while walking the chain. JPEGTables is always deferred.
const EAGER_TAGS: &[TiffTag] = &[
    TiffTag::NewSubfileType,
    TiffTag::SubfileType,
    TiffTag::ImageWidth,
    TiffTag::ImageLength,
    TiffTag::BitsPerSample,
    TiffTag::Compression,
    TiffTag::PhotometricInterpretation,
    TiffTag::ImageDescription,
    TiffTag::Make,
    TiffTag::Model,
    TiffTag::StripOffsets,
    TiffTag::SamplesPerPixel,
    TiffTag::RowsPerStrip,
    TiffTag::StripByteCounts,
    TiffTag::XResolution,
    TiffTag::YResolution,
    TiffTag::PlanarConfiguration,
    TiffTag::ResolutionUnit,
    TiffTag::Software,
    TiffTag::Predictor,
    TiffTag::TileWidth,
    TiffTag::TileLength,
    TiffTag::TileOffsets,
    TiffTag::TileByteCounts,
    TiffTag::ExtraSamples,
    TiffTag::SampleFormat,
    TiffTag::YCbCrSubSampling,
    TiffTag::NdpiMagnification,
];

// =============================================================================
// Ifd
// =============================================================================

/// One parsed Image File Directory (a page).
#[derive(Debug, Clone)]
pub struct Ifd {
    /// Position in the chain, 0-based
    pub page_index: usize,

    /// File offset of the directory
    pub offset: u64,

    /// Offset of the next directory, 0 for the last one
    pub next_offset: u64,

    entries: BTreeMap<u16, IfdEntry>,
    values: HashMap<u16, TagValue>,
    /// Text tags whose eager value was cut at the text cap
    truncated: HashSet<u16>,
}

impl Ifd {
    /// Raw entry for a tag, resolved or not.
    pub fn entry(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.get(&tag.as_u16())
    }

    pub fn has(&self, tag: TiffTag) -> bool {
        self.entries.contains_key(&tag.as_u16())
    }

    /// Tag ids present in the directory, ascending.
    pub fn tag_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.keys().copied()
    }

    /// Eagerly resolved value of a tag.
    pub fn value(&self, tag: TiffTag) -> Option<&TagValue> {
        self.values.get(&tag.as_u16())
    }

    pub fn u64_value(&self, tag: TiffTag) -> Option<u64> {
        self.value(tag).and_then(TagValue::first_u64)
    }

    pub fn u32_value(&self, tag: TiffTag) -> Option<u32> {
        self.u64_value(tag).and_then(|v| u32::try_from(v).ok())
    }

    pub fn f64_value(&self, tag: TiffTag) -> Option<f64> {
        self.value(tag).and_then(TagValue::first_f64)
    }

    pub fn text(&self, tag: TiffTag) -> Option<&str> {
        self.value(tag).and_then(TagValue::as_str)
    }

    pub fn width(&self) -> Option<u32> {
        self.u32_value(TiffTag::ImageWidth)
    }

    pub fn height(&self) -> Option<u32> {
        self.u32_value(TiffTag::ImageLength)
    }

    /// Width and height when both are present and positive.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width(), self.height()) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.text(TiffTag::ImageDescription)
    }

    pub fn new_subfile_type(&self) -> u64 {
        self.u64_value(TiffTag::NewSubfileType).unwrap_or(0)
    }

    pub fn subfile_type(&self) -> Option<u64> {
        self.u64_value(TiffTag::SubfileType)
    }

    /// Flagged as a reduced-resolution copy of another page.
    pub fn is_reduced_resolution(&self) -> bool {
        self.new_subfile_type() & 1 == 1 || self.subfile_type() == Some(2)
    }

    pub fn is_tiled(&self) -> bool {
        self.has(TiffTag::TileWidth) && self.has(TiffTag::TileLength)
    }

    /// Compression code, defaulting to 1 (none).
    pub fn compression_code(&self) -> u16 {
        self.u64_value(TiffTag::Compression)
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(1)
    }

    /// Full value of a tag, read from the file if it was deferred.
    ///
    /// Returns `Ok(None)` when the tag is absent.
    pub async fn resolve<R>(
        &self,
        reader: &R,
        header: &TiffHeader,
        tag: TiffTag,
    ) -> Result<Option<TagValue>, TiffError>
    where
        R: RangeReader + ?Sized,
    {
        if !self.truncated.contains(&tag.as_u16()) {
            if let Some(value) = self.value(tag) {
                return Ok(Some(value.clone()));
            }
        }
        match self.entry(tag) {
            Some(entry) => {
                let value = ValueReader::new(reader, header).resolve(entry).await?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

// =============================================================================
// DirectoryIndex
// =============================================================================

/// The parsed directory chain of one file.
#[derive(Debug, Clone)]
pub struct DirectoryIndex {
    pub header: TiffHeader,
    pub ifds: Vec<Ifd>,
}

impl DirectoryIndex {
    pub fn pages(&self) -> &[Ifd] {
        &self.ifds
    }

    pub fn page(&self, index: usize) -> Option<&Ifd> {
        self.ifds.get(index)
    }

    pub fn len(&self) -> usize {
        self.ifds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ifds.is_empty()
    }
}

// =============================================================================
// DirectoryParser
// =============================================================================

/// Walks an IFD chain and builds a [`DirectoryIndex`].
#[derive(Debug, Clone)]
pub struct DirectoryParser {
    pub max_pages: usize,
    pub max_entries: u64,
    pub max_eager_text: u64,
    pub max_eager_array: u64,
    pub coalesce: CoalescePolicy,
    pub max_in_flight: usize,
}

impl Default for DirectoryParser {
    fn default() -> Self {
        Self {
            max_pages: MAX_PAGES,
            max_entries: MAX_IFD_ENTRIES,
            max_eager_text: MAX_EAGER_TEXT_BYTES,
            max_eager_array: MAX_EAGER_ARRAY_BYTES,
            coalesce: CoalescePolicy::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl DirectoryParser {
    /// Parse the header and every directory of the chain.
    ///
    /// # Errors
    /// - header errors (`InvalidMagic`, `InvalidVersion`, ...) for non-TIFF input
    /// - `CyclicIfdChain` when a directory offset repeats
    /// - `TooManyPages` past `max_pages`
    /// - `MalformedIfd` / `InvalidIfdOffset` / `InvalidTagValue` for broken structure
    pub async fn parse<R>(&self, reader: &R) -> Result<DirectoryIndex, TiffError>
    where
        R: RangeReader + ?Sized,
    {
        let size = reader.size();
        let head = reader.read_at(0, BIGTIFF_HEADER_SIZE).await?;
        let header = TiffHeader::parse(&head, size)?;

        debug!(
            "Parsing {}: {:?}, bigtiff={}, first IFD at {}",
            reader.identifier(),
            header.byte_order,
            header.is_bigtiff,
            header.first_ifd_offset
        );

        if header.first_ifd_offset == 0 {
            return Err(TiffError::MalformedIfd {
                offset: 0,
                message: "header points to no directory".to_string(),
            });
        }

        let mut visited = HashSet::new();
        let mut ifds: Vec<Ifd> = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 {
            if !visited.insert(offset) {
                return Err(TiffError::CyclicIfdChain {
                    offset,
                    page: ifds.len().saturating_sub(1),
                });
            }
            if ifds.len() >= self.max_pages {
                return Err(TiffError::TooManyPages {
                    max: self.max_pages,
                });
            }
            if offset >= size {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            let raw = self.read_raw_ifd(reader, &header, offset).await?;
            let (values, truncated) = self.resolve_eager(reader, &header, &raw.entries).await?;
            let page_index = ifds.len();

            debug!(
                "IFD {} at {}: {} entries, {} resolved, next {}",
                page_index,
                raw.offset,
                raw.entries.len(),
                values.len(),
                raw.next_offset
            );

            offset = raw.next_offset;
            ifds.push(Ifd {
                page_index,
                offset: raw.offset,
                next_offset: raw.next_offset,
                entries: raw
                    .entries
                    .into_iter()
                    .map(|entry| (entry.tag_id, entry))
                    .collect(),
                values,
                truncated,
            });
        }

        Ok(DirectoryIndex { header, ifds })
    }

    async fn read_raw_ifd<R>(
        &self,
        reader: &R,
        header: &TiffHeader,
        offset: u64,
    ) -> Result<RawIfd, TiffError>
    where
        R: RangeReader + ?Sized,
    {
        let size = reader.size();
        let count_size = header.ifd_count_size() as u64;
        if offset + count_size > size {
            return Err(TiffError::MalformedIfd {
                offset,
                message: "entry count runs past end of file".to_string(),
            });
        }

        let count_bytes = reader.read_exact_at(offset, count_size as usize).await?;
        let count = header.read_entry_count(&count_bytes);
        if count == 0 {
            return Err(TiffError::MalformedIfd {
                offset,
                message: "directory has no entries".to_string(),
            });
        }
        if count > self.max_entries {
            return Err(TiffError::MalformedIfd {
                offset,
                message: format!("{} entries exceeds limit of {}", count, self.max_entries),
            });
        }

        let table_len = count * header.ifd_entry_size() as u64 + header.offset_size() as u64;
        let table_start = offset + count_size;
        if table_start + table_len > size {
            return Err(TiffError::MalformedIfd {
                offset,
                message: format!(
                    "{} entries run past end of file ({} bytes)",
                    count, size
                ),
            });
        }

        let table = reader
            .read_exact_at(table_start, table_len as usize)
            .await?;
        RawIfd::parse(offset, count, &table, header)
    }

    /// Decode inline values and fetch out-of-line ones in one coalesced batch.
    async fn resolve_eager<R>(
        &self,
        reader: &R,
        header: &TiffHeader,
        entries: &[IfdEntry],
    ) -> Result<(HashMap<u16, TagValue>, HashSet<u16>), TiffError>
    where
        R: RangeReader + ?Sized,
    {
        let values_reader = ValueReader::new(reader, header);
        let mut values = HashMap::new();
        let mut truncated = HashSet::new();
        let mut pending: Vec<(&IfdEntry, FieldType)> = Vec::new();
        let mut ranges: Vec<ByteRange> = Vec::new();

        for entry in entries {
            let Some(field_type) = entry.field_type else {
                continue;
            };
            let eager = TiffTag::from_u16(entry.tag_id).is_some_and(|t| EAGER_TAGS.contains(&t));
            if !eager {
                continue;
            }

            match values_reader.value_range(entry)? {
                None => {
                    let bytes = values_reader.read_bytes(entry).await?;
                    let value = TagValue::decode(
                        entry.tag_id,
                        field_type,
                        entry.count,
                        &bytes,
                        header.byte_order,
                    )?;
                    values.insert(entry.tag_id, value);
                }
                Some((value_offset, len)) => {
                    let len = if field_type == FieldType::Ascii {
                        if len > self.max_eager_text {
                            truncated.insert(entry.tag_id);
                        }
                        len.min(self.max_eager_text)
                    } else if len > self.max_eager_array {
                        continue;
                    } else {
                        len
                    };
                    pending.push((entry, field_type));
                    ranges.push(ByteRange::new(value_offset, len));
                }
            }
        }

        if ranges.is_empty() {
            return Ok((values, truncated));
        }

        let fetched = fetch_coalesced(reader, &ranges, self.coalesce, self.max_in_flight).await?;
        for ((entry, field_type), bytes) in pending.into_iter().zip(fetched) {
            let value = TagValue::decode(
                entry.tag_id,
                field_type,
                entry.count,
                &bytes,
                header.byte_order,
            )?;
            values.insert(entry.tag_id, value);
        }
        Ok((values, truncated))
    }
}

// =============================================================================
// Tests
// =============================================================================

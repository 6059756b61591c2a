//! TIFF tag value decoding.
//!
//! Values are stored either inline in the IFD entry (when they fit in 4 or
//! 8 bytes) or at an offset in the file. [`TagValue::decode`] turns the raw
//! bytes into a typed value; [`ValueReader`] fetches out-of-line bytes for
//! tags that were deferred when the directory was parsed.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::{FieldType, TiffTag};

// =============================================================================
// TagValue
// =============================================================================

/// A decoded tag value.
///
/// Integer types widen to 64 bits; BYTE arrays are unsigned integers while
/// UNDEFINED stays opaque.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Unsigned(Vec<u64>),
    Signed(Vec<i64>),
    Rational(Vec<(u32, u32)>),
    SignedRational(Vec<(i32, i32)>),
    Float(Vec<f64>),
    Ascii(String),
    Undefined(Bytes),
}

impl TagValue {
    /// Decode `count` values of `field_type` from `bytes`.
    ///
    /// ASCII values tolerate fewer bytes than `count` (text is capped when
    /// read eagerly) and stop at the first NUL.
    pub fn decode(
        tag_id: u16,
        field_type: FieldType,
        count: u64,
        bytes: &[u8],
        byte_order: ByteOrder,
    ) -> Result<Self, TiffError> {
        if field_type == FieldType::Ascii {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            return Ok(TagValue::Ascii(
                String::from_utf8_lossy(&bytes[..end]).into_owned(),
            ));
        }

        let size = field_type.size_in_bytes();
        let needed = (size as u64).checked_mul(count);
        if needed.map_or(true, |n| n > bytes.len() as u64) {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(tag_id),
                message: format!(
                    "{} values of {:?} need more than the {} bytes available",
                    count,
                    field_type,
                    bytes.len()
                ),
            });
        }

        let chunks = bytes[..size * count as usize].chunks_exact(size);
        let order = byte_order;
        let value = match field_type {
            FieldType::Byte => TagValue::Unsigned(chunks.map(|c| c[0] as u64).collect()),
            FieldType::Short => {
                TagValue::Unsigned(chunks.map(|c| order.read_u16(c) as u64).collect())
            }
            FieldType::Long | FieldType::Ifd => {
                TagValue::Unsigned(chunks.map(|c| order.read_u32(c) as u64).collect())
            }
            FieldType::Long8 | FieldType::Ifd8 => {
                TagValue::Unsigned(chunks.map(|c| order.read_u64(c)).collect())
            }
            FieldType::SByte => TagValue::Signed(chunks.map(|c| c[0] as i8 as i64).collect()),
            FieldType::SShort => {
                TagValue::Signed(chunks.map(|c| order.read_u16(c) as i16 as i64).collect())
            }
            FieldType::SLong => {
                TagValue::Signed(chunks.map(|c| order.read_u32(c) as i32 as i64).collect())
            }
            FieldType::SLong8 => {
                TagValue::Signed(chunks.map(|c| order.read_u64(c) as i64).collect())
            }
            FieldType::Rational => TagValue::Rational(
                chunks
                    .map(|c| (order.read_u32(&c[0..4]), order.read_u32(&c[4..8])))
                    .collect(),
            ),
            FieldType::SRational => TagValue::SignedRational(
                chunks
                    .map(|c| {
                        (
                            order.read_u32(&c[0..4]) as i32,
                            order.read_u32(&c[4..8]) as i32,
                        )
                    })
                    .collect(),
            ),
            FieldType::Float => TagValue::Float(chunks.map(|c| order.read_f32(c) as f64).collect()),
            FieldType::Double => TagValue::Float(chunks.map(|c| order.read_f64(c)).collect()),
            FieldType::Undefined | FieldType::Ascii => {
                TagValue::Undefined(Bytes::copy_from_slice(&bytes[..count as usize]))
            }
        };
        Ok(value)
    }

    /// First value as an unsigned integer.
    pub fn first_u64(&self) -> Option<u64> {
        match self {
            TagValue::Unsigned(v) => v.first().copied(),
            TagValue::Signed(v) => v.first().and_then(|&x| u64::try_from(x).ok()),
            _ => None,
        }
    }

    /// All values as unsigned integers (offset and count tables).
    pub fn as_u64_slice(&self) -> Option<&[u64]> {
        match self {
            TagValue::Unsigned(v) => Some(v),
            _ => None,
        }
    }

    /// First value as a float; rationals with a zero denominator yield `None`.
    pub fn first_f64(&self) -> Option<f64> {
        match self {
            TagValue::Unsigned(v) => v.first().map(|&x| x as f64),
            TagValue::Signed(v) => v.first().map(|&x| x as f64),
            TagValue::Float(v) => v.first().copied(),
            TagValue::Rational(v) => v
                .first()
                .filter(|(_, d)| *d != 0)
                .map(|&(n, d)| n as f64 / d as f64),
            TagValue::SignedRational(v) => v
                .first()
                .filter(|(_, d)| *d != 0)
                .map(|&(n, d)| n as f64 / d as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// Opaque bytes. BYTE arrays are accepted too since some writers store
    /// JPEGTables that way.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            TagValue::Undefined(b) => Some(b.clone()),
            TagValue::Unsigned(v) if v.iter().all(|&x| x <= u8::MAX as u64) => {
                Some(v.iter().map(|&x| x as u8).collect::<Vec<u8>>().into())
            }
            _ => None,
        }
    }
}

pub(crate) fn tag_name(tag_id: u16) -> &'static str {
    TiffTag::from_u16(tag_id).map_or("unknown", TiffTag::name)
}

// =============================================================================
// ValueReader
// =============================================================================

/// Reads tag values from a TIFF file on demand.
///
/// Combines a RangeReader with the header so values are read respecting
/// the file's byte order and offset size.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    /// Where an entry's out-of-line value lives, validated against the file.
    ///
    /// Returns `None` for inline values.
    pub fn value_range(&self, entry: &IfdEntry) -> Result<Option<(u64, u64)>, TiffError> {
        if entry.is_inline {
            return Ok(None);
        }
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let offset = entry.value_offset(self.header.byte_order);
        let fits = offset
            .checked_add(size)
            .is_some_and(|end| end <= self.reader.size());
        if !fits {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry.tag_id),
                message: format!(
                    "{} bytes at offset {} run past the end of the file ({} bytes)",
                    size,
                    offset,
                    self.reader.size()
                ),
            });
        }
        Ok(Some((offset, size)))
    }

    /// Raw value bytes: from the entry itself when inline, else one range read.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        match self.value_range(entry)? {
            None => {
                let size = entry
                    .value_byte_size()
                    .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
                Ok(Bytes::copy_from_slice(
                    &entry.value_offset_bytes[..size as usize],
                ))
            }
            Some((offset, size)) => Ok(self.reader.read_exact_at(offset, size as usize).await?),
        }
    }

    /// Fetch and decode an entry's full value.
    pub async fn resolve(&self, entry: &IfdEntry) -> Result<TagValue, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let bytes = self.read_bytes(entry).await?;
        TagValue::decode(
            entry.tag_id,
            field_type,
            entry.count,
            &bytes,
            self.header.byte_order,
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

//! TIFF and BigTIFF container parsing.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian, MM = big-endian)
//!   in the header. All multi-byte values must be read respecting this order.
//!
//! - **Classic TIFF vs BigTIFF**: Classic TIFF uses 32-bit offsets (max 4GB files),
//!   while BigTIFF uses 64-bit offsets. The parser handles both transparently.
//!
//! - **IFD (Image File Directory)**: One page of the file. Slides chain several:
//!   the base image, reduced-resolution copies, a thumbnail, label and macro photos.
//!
//! - **Inline vs offset values**: Small values are stored inline in the IFD entry,
//!   larger values are stored at an offset pointed to by the entry.

mod directory;
mod parser;
mod tags;
mod values;

pub use directory::{
    DirectoryIndex, DirectoryParser, Ifd, MAX_EAGER_ARRAY_BYTES, MAX_EAGER_TEXT_BYTES,
    MAX_IFD_ENTRIES, MAX_PAGES,
};
pub use parser::{ByteOrder, IfdEntry, RawIfd, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use tags::{Compression, FieldType, Photometric, PlanarConfig, ResolutionUnit, TiffTag};
pub use values::{TagValue, ValueReader};

//! Slide structure: the TIFF container, thumbnail page selection and
//! vendor metadata.

pub mod metadata;
pub mod select;
pub mod tiff;

pub use metadata::{extract, SlideMetadata, VendorRule, UNKNOWN_VENDOR, VENDOR_RULES};
pub use select::{select, CandidateKind, ThumbnailCandidate};

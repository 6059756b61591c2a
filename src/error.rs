use std::time::Duration;

use thiserror::Error;

/// I/O errors that can occur when reading from a remote slide
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Network hiccup, timeout, truncated body or 5xx answer. Retryable.
    #[error("Transient fetch error: {0}")]
    Transient(String),

    /// 401/403: the credential or signed URL is invalid or expired
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// The server answered a ranged request with the full body
    #[error("Server does not support range requests: {0}")]
    RangeNotSupported(String),

    /// Unexpected HTTP status that fits no other class
    #[error("Unexpected HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    /// The source could not be used to build a request
    #[error("Invalid source: {0}")]
    InvalidSource(String),
}

impl IoError {
    /// Whether the retry policy may re-issue the failed read.
    pub fn is_transient(&self) -> bool {
        matches!(self, IoError::Transient(_))
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// An IFD offset was visited twice while walking the chain
    #[error("Cyclic IFD chain: offset {offset} revisited after page {page}")]
    CyclicIfdChain { offset: u64, page: usize },

    /// The chain holds more directories than the parser accepts
    #[error("Too many IFDs: chain exceeds {max} pages")]
    TooManyPages { max: usize },

    /// Structurally broken directory
    #[error("Malformed IFD at offset {offset}: {message}")]
    MalformedIfd { offset: u64, message: String },

    /// Required tag is missing from IFD
    #[error("Missing required tag {tag} on page {page}")]
    MissingTag { tag: &'static str, page: usize },

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

impl TiffError {
    /// True when the bytes are not a TIFF/BigTIFF container at all.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            TiffError::InvalidMagic(_)
                | TiffError::InvalidVersion(_)
                | TiffError::InvalidBigTiffOffsetSize(_)
                | TiffError::FileTooSmall { .. }
        )
    }
}

/// Errors raised while turning a page's segments into pixels
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Compression code with no decoding routine
    #[error("Unsupported compression {code} on page {page}")]
    UnsupportedCompression { code: u16, page: usize },

    /// Pixel layout the decoder cannot express (bit depth, sample count...)
    #[error("Unsupported pixel layout on page {page}: {message}")]
    UnsupportedLayout { page: usize, message: String },

    /// Offset/byte-count tables inconsistent with the image geometry
    #[error("Inconsistent segment table on page {page}: {message}")]
    SegmentTable { page: usize, message: String },

    /// One segment failed to decompress; the whole image is discarded
    #[error("Segment {index} failed to decode: {message}")]
    Segment { index: usize, message: String },

    #[error("Decoded image {width}x{height} exceeds the {limit} byte limit")]
    ImageTooLarge { width: u32, height: u32, limit: usize },
}

/// Errors from the PNG rendering stage
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Invalid maximum dimension: {0}")]
    InvalidDimension(u32),

    #[error("Pixel buffer holds {actual} bytes, expected {expected}")]
    InvalidBuffer { expected: usize, actual: usize },

    #[error("PNG encoding failed: {0}")]
    Encode(String),
}

/// Errors from persisting a rendered thumbnail
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Cannot derive thumbnail location: {0}")]
    InvalidLocation(String),

    #[error("Upload failed: {0}")]
    Upload(String),
}

/// Failure classes a caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientFetch,
    Permission,
    NotFound,
    UnsupportedFormat,
    CorruptFormat,
    Decode,
    Render,
    Timeout,
    InvalidRequest,
    Storage,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case label used in JSON error bodies.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransientFetch => "transient_fetch",
            ErrorKind::Permission => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::CorruptFormat => "corrupt_format",
            ErrorKind::Decode => "decode_error",
            ErrorKind::Render => "render_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

/// Top-level error of a metadata or thumbnail request
#[derive(Debug, Clone, Error)]
pub enum ThumbnailError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The chain parsed but no page has usable dimensions
    #[error("No image pages with positive dimensions")]
    NoImagePages,

    /// The request itself is unusable (bad URL, out-of-range parameter)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A blocking worker panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Join(String),
}

impl ThumbnailError {
    /// Map the error onto its failure class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ThumbnailError::Io(e) => io_kind(e),
            ThumbnailError::Tiff(e) => tiff_kind(e),
            ThumbnailError::Decode(e) => match e {
                DecodeError::Io(io) => io_kind(io),
                DecodeError::Tiff(tiff) => tiff_kind(tiff),
                DecodeError::UnsupportedCompression { .. }
                | DecodeError::UnsupportedLayout { .. }
                | DecodeError::ImageTooLarge { .. } => ErrorKind::UnsupportedFormat,
                DecodeError::SegmentTable { .. } => ErrorKind::CorruptFormat,
                DecodeError::Segment { .. } => ErrorKind::Decode,
            },
            ThumbnailError::Render(_) => ErrorKind::Render,
            ThumbnailError::Store(StoreError::InvalidLocation(_)) => ErrorKind::InvalidRequest,
            ThumbnailError::Store(StoreError::Upload(_)) => ErrorKind::Storage,
            ThumbnailError::Timeout(_) => ErrorKind::Timeout,
            ThumbnailError::NoImagePages => ErrorKind::CorruptFormat,
            ThumbnailError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ThumbnailError::Join(_) => ErrorKind::Internal,
        }
    }

    /// Only exhausted transient fetches and timeouts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientFetch | ErrorKind::Timeout)
    }
}

fn io_kind(err: &IoError) -> ErrorKind {
    match err {
        IoError::Transient(_) => ErrorKind::TransientFetch,
        IoError::PermissionDenied(_) => ErrorKind::Permission,
        IoError::NotFound(_) => ErrorKind::NotFound,
        // Offsets pointing past the end of the object mean the file lies about itself
        IoError::RangeOutOfBounds { .. } => ErrorKind::CorruptFormat,
        IoError::RangeNotSupported(_) => ErrorKind::UnsupportedFormat,
        IoError::Http { .. } | IoError::InvalidSource(_) => ErrorKind::InvalidRequest,
    }
}

fn tiff_kind(err: &TiffError) -> ErrorKind {
    match err {
        TiffError::Io(io) => io_kind(io),
        e if e.is_unsupported() => ErrorKind::UnsupportedFormat,
        _ => ErrorKind::CorruptFormat,
    }
}

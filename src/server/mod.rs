//! HTTP server layer.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          HTTP Layer                          │
//! │     GET /metadata   GET /thumbnail   POST /process           │
//! │                                                              │
//! │  ┌────────────────────────┐   ┌───────────────────────────┐  │
//! │  │        handlers        │   │          routes           │  │
//! │  │ (requests, error map)  │   │ (router, CORS, tracing)   │  │
//! │  └────────────────────────┘   └───────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    clamp_max_size, health_handler, metadata_handler, process_handler, remote_source, status_for,
    thumbnail_handler, AppState, ErrorResponse, HandlerError, HealthResponse, MetadataResponse,
    ProcessRequest, ProcessResponse, SourceQueryParams, ThumbnailQueryParams, MAX_THUMBNAIL_SIZE,
    MIN_THUMBNAIL_SIZE, SOURCE_AUTHORIZATION_HEADER,
};
pub use routes::{create_router, RouterConfig};

//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /metadata?url=` - Slide metadata as JSON
//! - `GET /thumbnail?url=&max_size=` - PNG thumbnail
//! - `POST /process` - Metadata plus a thumbnail persisted to object storage

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, ThumbnailError};
use crate::format::{CandidateKind, SlideMetadata};
use crate::source::{RemoteSource, SlideSource};
use crate::thumbnail::{thumbnail_location, ThumbnailService, ThumbnailStore};

/// Header carrying the credential forwarded to the slide's host.
pub const SOURCE_AUTHORIZATION_HEADER: &str = "x-source-authorization";

/// Smallest accepted `max_size`.
pub const MIN_THUMBNAIL_SIZE: u32 = 16;

/// Largest accepted `max_size`.
pub const MAX_THUMBNAIL_SIZE: u32 = 4096;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's State extractor.
pub struct AppState<S: SlideSource> {
    pub service: Arc<ThumbnailService<S>>,
    pub store: Arc<dyn ThumbnailStore>,
    /// Cache-Control max-age of thumbnail responses, in seconds
    pub cache_max_age: u32,
    /// Thumbnail size when the request does not name one
    pub default_max_size: u32,
    /// Bucket overriding the one derived from the slide URL
    pub output_bucket: Option<String>,
    pub output_prefix: Option<String>,
}

impl<S: SlideSource> AppState<S> {
    pub fn new(service: ThumbnailService<S>, store: Arc<dyn ThumbnailStore>) -> Self {
        Self {
            service: Arc::new(service),
            store,
            cache_max_age: 86400,
            default_max_size: crate::thumbnail::DEFAULT_MAX_DIMENSION,
            output_bucket: None,
            output_prefix: None,
        }
    }
}

impl<S: SlideSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            store: Arc::clone(&self.store),
            cache_max_age: self.cache_max_age,
            default_max_size: self.default_max_size,
            output_bucket: self.output_bucket.clone(),
            output_prefix: self.output_prefix.clone(),
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters naming a slide.
#[derive(Debug, Deserialize)]
pub struct SourceQueryParams {
    /// Public or signed HTTP(S) URL of the slide
    pub url: String,
}

/// Query parameters for thumbnail requests.
#[derive(Debug, Deserialize)]
pub struct ThumbnailQueryParams {
    pub url: String,

    /// Longest side of the thumbnail, clamped to 16-4096
    #[serde(default)]
    pub max_size: Option<u32>,
}

/// Body of `POST /process`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRequest {
    pub id: String,
    pub created_on: String,
    pub image_bucket_link: String,
    pub patient_id: String,
    pub slide_id: String,
    pub block_id: String,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "corrupt_format")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response of `GET /metadata`.
#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    #[serde(flatten)]
    pub metadata: SlideMetadata,

    /// Slide URL without query string
    pub source_url: String,
}

/// Response of `POST /process`.
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub id: String,
    pub thumbnail_image_link: String,
    pub patient_id: String,
    pub slide_id: String,
    pub metadata: SlideMetadata,
    pub block_id: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// HTTP status for each failure class.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Permission => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::CorruptFormat | ErrorKind::Decode => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TransientFetch | ErrorKind::Storage => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Render | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Wrapper for handler errors to implement IntoResponse.
///
/// 5xx responses are logged at ERROR, 404s at DEBUG and other client
/// errors at WARN.
#[derive(Debug)]
pub struct HandlerError(pub ThumbnailError);

impl From<ThumbnailError> for HandlerError {
    fn from(err: ThumbnailError) -> Self {
        HandlerError(err)
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        let error_type = kind.as_str();
        let message = self.0.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let body = ErrorResponse::with_status(error_type, message, status);
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Build the remote source of a request, forwarding `X-Source-Authorization`.
pub fn remote_source(url: &str, headers: &HeaderMap) -> Result<RemoteSource, ThumbnailError> {
    let source = RemoteSource::parse(url)?;
    match headers.get(SOURCE_AUTHORIZATION_HEADER) {
        Some(value) => {
            let value = value.to_str().map_err(|_| {
                ThumbnailError::InvalidRequest(format!(
                    "{} is not valid ASCII",
                    SOURCE_AUTHORIZATION_HEADER
                ))
            })?;
            Ok(source.with_authorization(value))
        }
        None => Ok(source),
    }
}

/// Clamp a requested thumbnail size into the accepted range.
pub fn clamp_max_size(requested: Option<u32>, default: u32) -> u32 {
    requested
        .unwrap_or(default)
        .clamp(MIN_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE)
}

/// Handle health check requests.
///
/// `GET /health` → `{"status": "ok", "version": "..."}`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle slide metadata requests.
///
/// `GET /metadata?url=<slide url>`
///
/// Reads only the directory chain of the slide. Missing properties are
/// returned as `null`.
pub async fn metadata_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Query(query): Query<SourceQueryParams>,
    headers: HeaderMap,
) -> Result<Json<MetadataResponse>, HandlerError> {
    let source = remote_source(&query.url, &headers)?;
    let metadata = state.service.metadata(&source).await?;

    Ok(Json(MetadataResponse {
        metadata,
        source_url: source.cache_identity(),
    }))
}

/// Handle thumbnail requests.
///
/// `GET /thumbnail?url=<slide url>&max_size=<pixels>`
///
/// # Headers
///
/// - `Content-Type: image/png`
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Thumbnail-Page`: index of the page the thumbnail was rendered from
/// - `X-Thumbnail-Source`: `explicit` or `synthesized`
pub async fn thumbnail_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Query(query): Query<ThumbnailQueryParams>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let source = remote_source(&query.url, &headers)?;
    let max_size = clamp_max_size(query.max_size, state.default_max_size);
    let output = state.service.thumbnail(&source, max_size).await?;

    let selection = match output.candidate.kind {
        CandidateKind::Explicit => "explicit",
        CandidateKind::Synthesized => "synthesized",
    };
    let response_headers = [
        (header::CONTENT_TYPE, "image/png".to_string()),
        (
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.cache_max_age),
        ),
        (
            HeaderName::from_static("x-thumbnail-page"),
            output.candidate.page_index.to_string(),
        ),
        (
            HeaderName::from_static("x-thumbnail-source"),
            selection.to_string(),
        ),
    ];
    Ok((StatusCode::OK, response_headers, output.png).into_response())
}

/// Handle processing requests.
///
/// `POST /process` extracts metadata, renders a thumbnail at the default
/// size, stores it next to the slide (or in the configured output bucket)
/// and echoes the request identifiers back.
pub async fn process_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, HandlerError> {
    info!(
        "Processing request {} (created {})",
        request.id, request.created_on
    );
    let source = remote_source(&request.image_bucket_link, &headers)?;
    let location = thumbnail_location(
        source.url(),
        state.output_bucket.as_deref(),
        state.output_prefix.as_deref(),
    )
    .map_err(ThumbnailError::from)?;

    let report = state
        .service
        .process(&source, state.default_max_size)
        .await?;
    let link = state
        .store
        .put(&location, report.thumbnail.png)
        .await
        .map_err(ThumbnailError::from)?;

    Ok(Json(ProcessResponse {
        id: request.id,
        thumbnail_image_link: link,
        patient_id: request.patient_id,
        slide_id: request.slide_id,
        metadata: report.metadata,
        block_id: request.block_id,
    }))
}

// =============================================================================
// Tests
// =============================================================================

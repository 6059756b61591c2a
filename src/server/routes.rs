//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                       - Health check
//! /metadata?url=                - Slide metadata
//! /thumbnail?url=&max_size=     - PNG thumbnail
//! /process                      - POST, thumbnail persisted to storage
//! ```
//!
//! # Example
//!
//! ```ignore
//! let source = HttpSlideSource::new(RetryPolicy::default())?;
//! let service = ThumbnailService::new(source);
//! let store = Arc::new(S3ThumbnailStore::new(client));
//!
//! let router = create_router(service, store, RouterConfig::default());
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_handler, metadata_handler, process_handler, thumbnail_handler, AppState,
    SOURCE_AUTHORIZATION_HEADER,
};
use crate::source::SlideSource;
use crate::thumbnail::{ThumbnailService, ThumbnailStore, DEFAULT_MAX_DIMENSION};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age of thumbnails in seconds
    pub cache_max_age: u32,

    /// Thumbnail size when a request does not name one
    pub default_max_size: u32,

    /// Bucket receiving processed thumbnails instead of the slide's own
    pub output_bucket: Option<String>,

    /// Key prefix inside the output bucket
    pub output_prefix: Option<String>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    /// Any origin, one day of caching, 512 pixel thumbnails, tracing on.
    fn default() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 86400,
            default_max_size: DEFAULT_MAX_DIMENSION,
            output_bucket: None,
            output_prefix: None,
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_default_max_size(mut self, max_size: u32) -> Self {
        self.default_max_size = max_size;
        self
    }

    pub fn with_output(mut self, bucket: Option<String>, prefix: Option<String>) -> Self {
        self.output_bucket = bucket;
        self.output_prefix = prefix;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
pub fn create_router<S>(
    service: ThumbnailService<S>,
    store: Arc<dyn ThumbnailStore>,
    config: RouterConfig,
) -> Router
where
    S: SlideSource + 'static,
{
    let mut state = AppState::new(service, store);
    state.cache_max_age = config.cache_max_age;
    state.default_max_size = config.default_max_size;
    state.output_bucket = config.output_bucket.clone();
    state.output_prefix = config.output_prefix.clone();

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/metadata", get(metadata_handler::<S>))
        .route("/thumbnail", get(thumbnail_handler::<S>))
        .route("/process", post(process_handler::<S>))
        .with_state(state)
        .layer(build_cors_layer(&config));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static(SOURCE_AUTHORIZATION_HEADER),
        ])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}

//! Configuration management.
//!
//! Options come from command-line arguments via clap, fall back to
//! environment variables with the `WSI_` prefix, then to defaults.
//!
//! # Environment Variables
//!
//! - `WSI_HOST` - Server bind address (default: 0.0.0.0)
//! - `WSI_PORT` - Server port (default: 8080)
//! - `WSI_MAX_SIZE` - Default thumbnail size (default: 512)
//! - `WSI_TIMEOUT` - Per-request budget in seconds (default: 60)
//! - `WSI_FETCH_RETRIES` - Attempts per range request (default: 3)
//! - `WSI_MAX_IN_FLIGHT` - Concurrent segment reads (default: 8)
//! - `WSI_BLOCK_SIZE` - Block cache block size in bytes (default: 64KB)
//! - `WSI_CACHE_BLOCKS` - Blocks cached per request (default: 64)
//! - `WSI_CACHE_DIRECTORIES` - Parsed directories kept (default: 256)
//! - `WSI_DIRECTORY_TTL` - Directory cache lifetime in seconds (default: 600)
//! - `WSI_OUTPUT_BUCKET` - Bucket receiving processed thumbnails
//! - `WSI_OUTPUT_PREFIX` - Key prefix inside the output bucket
//! - `WSI_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `WSI_S3_REGION` - AWS region (default: us-east-1)
//! - `WSI_CORS_ORIGINS` - Allowed CORS origins, comma-separated (default: any)
//! - `WSI_CACHE_MAX_AGE` - Thumbnail Cache-Control max-age (default: 86400)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::decode::{DecodeOptions, DEFAULT_MAX_DECODED_BYTES};
use crate::format::tiff::DirectoryParser;
use crate::io::{
    CoalescePolicy, RetryPolicy, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_IN_FLIGHT,
};
use crate::server::{RouterConfig, MAX_THUMBNAIL_SIZE, MIN_THUMBNAIL_SIZE};
use crate::thumbnail::{
    ServiceConfig, DEFAULT_DIRECTORY_CACHE_CAPACITY, DEFAULT_MAX_DIMENSION,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default directory cache lifetime in seconds.
pub const DEFAULT_DIRECTORY_TTL_SECS: u64 = 600;

/// Default thumbnail Cache-Control max-age in seconds (1 day).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 86400;

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Thumbnailer - thumbnails and metadata of remote Whole Slide Images.
///
/// Reads only the directory chain and one small page of a TIFF/BigTIFF
/// slide through HTTP range requests.
#[derive(Parser, Debug)]
#[command(name = "wsi-thumbnailer")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server options, used when no subcommand is given.
    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// The selected command; running without one starts the server.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP service
    Serve(ServeConfig),

    /// Print metadata of one slide and optionally write its thumbnail
    Inspect(InspectConfig),
}

// =============================================================================
// Serve Configuration
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "WSI_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "WSI_PORT")]
    pub port: u16,

    /// Thumbnail size used when a request does not set max_size.
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION, env = "WSI_MAX_SIZE")]
    pub max_size: u32,

    /// Budget for one whole request, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "WSI_TIMEOUT")]
    pub timeout_secs: u64,

    // =========================================================================
    // Fetch Configuration
    // =========================================================================
    /// Attempts per range request; only transient failures are retried.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "WSI_FETCH_RETRIES")]
    pub fetch_retries: u32,

    /// Maximum concurrent segment reads per request.
    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT, env = "WSI_MAX_IN_FLIGHT")]
    pub max_in_flight: usize,

    /// Block size in bytes for the block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of blocks cached per request.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CAPACITY, env = "WSI_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Maximum number of parsed directories to keep.
    #[arg(long, default_value_t = DEFAULT_DIRECTORY_CACHE_CAPACITY, env = "WSI_CACHE_DIRECTORIES")]
    pub cache_directories: usize,

    /// Lifetime of a cached directory, in seconds.
    #[arg(long, default_value_t = DEFAULT_DIRECTORY_TTL_SECS, env = "WSI_DIRECTORY_TTL")]
    pub directory_ttl_secs: u64,

    /// HTTP Cache-Control max-age of thumbnails in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "WSI_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // Output Storage Configuration
    // =========================================================================
    /// Bucket receiving processed thumbnails.
    ///
    /// If not specified, thumbnails are written next to the slide.
    #[arg(long, env = "WSI_OUTPUT_BUCKET")]
    pub output_bucket: Option<String>,

    /// Key prefix for processed thumbnails.
    #[arg(long, env = "WSI_OUTPUT_PREFIX")]
    pub output_prefix: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "WSI_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "WSI_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "WSI_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_THUMBNAIL_SIZE..=MAX_THUMBNAIL_SIZE).contains(&self.max_size) {
            return Err(format!(
                "max_size must be between {} and {}",
                MIN_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE
            ));
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }
        if self.fetch_retries == 0 {
            return Err("fetch_retries must be at least 1".to_string());
        }
        if self.max_in_flight == 0 {
            return Err("max_in_flight must be greater than 0".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.cache_directories == 0 {
            return Err("cache_directories must be greater than 0".to_string());
        }
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        if self.output_bucket.as_deref() == Some("") {
            return Err("output_bucket must not be empty when set".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn directory_ttl(&self) -> Duration {
        Duration::from_secs(self.directory_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.fetch_retries)
    }

    /// Settings of the thumbnail service.
    pub fn service_config(&self) -> ServiceConfig {
        service_config(
            self.timeout(),
            self.max_in_flight,
            self.block_size,
            self.cache_blocks,
        )
    }

    /// Settings of the HTTP router.
    pub fn router_config(&self) -> RouterConfig {
        let mut config = RouterConfig::default()
            .with_cache_max_age(self.cache_max_age)
            .with_default_max_size(self.max_size)
            .with_output(self.output_bucket.clone(), self.output_prefix.clone())
            .with_tracing(!self.no_tracing);
        if let Some(origins) = &self.cors_origins {
            config = config.with_cors_origins(origins.clone());
        }
        config
    }
}

fn service_config(
    timeout: Duration,
    max_in_flight: usize,
    block_size: usize,
    block_capacity: usize,
) -> ServiceConfig {
    let parser = DirectoryParser {
        max_in_flight,
        ..DirectoryParser::default()
    };
    ServiceConfig {
        timeout,
        block_size,
        block_capacity,
        parser,
        decode: DecodeOptions {
            max_in_flight,
            coalesce: CoalescePolicy::default(),
            max_decoded_bytes: DEFAULT_MAX_DECODED_BYTES,
        },
    }
}

// =============================================================================
// Inspect Configuration
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// HTTP(S) URL of the slide, plain or signed.
    pub url: String,

    /// Write the thumbnail PNG to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Longest side of the thumbnail.
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION)]
    pub max_size: u32,

    /// Bearer token sent to the slide's host.
    #[arg(long, env = "WSI_SOURCE_TOKEN")]
    pub token: Option<String>,

    /// Budget for the whole run, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Attempts per range request.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub fetch_retries: u32,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl InspectConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("a slide URL is required".to_string());
        }
        if !(MIN_THUMBNAIL_SIZE..=MAX_THUMBNAIL_SIZE).contains(&self.max_size) {
            return Err(format!(
                "max_size must be between {} and {}",
                MIN_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE
            ));
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }
        if self.fetch_retries == 0 {
            return Err("fetch_retries must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.fetch_retries)
    }

    pub fn service_config(&self) -> ServiceConfig {
        service_config(
            Duration::from_secs(self.timeout_secs),
            DEFAULT_MAX_IN_FLIGHT,
            DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_CAPACITY,
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

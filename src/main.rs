//! WSI Thumbnailer - thumbnails and metadata of remote Whole Slide Images.
//!
//! This binary starts the HTTP server or inspects a single slide.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_thumbnailer::{
    config::{Cli, Command, InspectConfig, ServeConfig},
    server::create_router,
    source::{HttpSlideSource, RemoteSource},
    thumbnail::{create_s3_client, DirectoryCache, S3ThumbnailStore, ThumbnailService},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Inspect(config) => run_inspect(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("WSI Thumbnailer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!(
        "  Thumbnails: {}px default, {}s timeout",
        config.max_size, config.timeout_secs
    );
    info!(
        "  Fetch: {} attempts, {} reads in flight, {}KB blocks x {}",
        config.fetch_retries,
        config.max_in_flight,
        config.block_size / 1024,
        config.cache_blocks
    );
    info!(
        "  Directory cache: {} entries, {}s TTL",
        config.cache_directories, config.directory_ttl_secs
    );
    match &config.output_bucket {
        Some(bucket) => info!("  Output bucket: {}", bucket),
        None => info!("  Output: next to each slide"),
    }
    if let Some(endpoint) = &config.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }
    info!("  S3 region: {}", config.s3_region);

    let source = match HttpSlideSource::new(config.retry_policy()) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let directories = DirectoryCache::with_capacity(config.cache_directories, config.directory_ttl());
    let service = ThumbnailService::with_config(source, config.service_config(), directories);

    let s3_client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
    let store = Arc::new(S3ThumbnailStore::new(s3_client));

    let router = create_router(service, store, config.router_config());

    let addr = config.bind_address();
    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("    curl 'http://{}/metadata?url=<slide url>'", addr);
    info!("    curl -o thumb.png 'http://{}/thumbnail?url=<slide url>'", addr);
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem. Logs go to stderr.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_thumbnailer=debug,tower_http=debug"
    } else {
        "wsi_thumbnailer=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(config: InspectConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let mut remote = match RemoteSource::parse(&config.url) {
        Ok(remote) => remote,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(token) = &config.token {
        remote = remote.with_bearer_token(token);
    }

    let source = match HttpSlideSource::new(config.retry_policy()) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let service = ThumbnailService::with_config(source, config.service_config(), DirectoryCache::new());

    let report = match &config.output {
        None => service.metadata(&remote).await.map(|metadata| {
            serde_json::json!({
                "source_url": remote.cache_identity(),
                "metadata": metadata,
            })
        }),
        Some(path) => match service.process(&remote, config.max_size).await {
            Ok(report) => {
                let thumbnail = &report.thumbnail;
                if let Err(e) = tokio::fs::write(path, &thumbnail.png).await {
                    eprintln!("Error: cannot write {}: {}", path.display(), e);
                    return ExitCode::FAILURE;
                }
                Ok(serde_json::json!({
                    "source_url": remote.cache_identity(),
                    "metadata": report.metadata,
                    "thumbnail": {
                        "path": path.display().to_string(),
                        "width": thumbnail.width,
                        "height": thumbnail.height,
                        "page": thumbnail.candidate.page_index,
                        "selection": thumbnail.candidate.kind,
                    },
                    "fetched": {
                        "bytes": thumbnail.stats.bytes_fetched,
                        "requests": thumbnail.stats.requests,
                        "file_size": thumbnail.stats.file_size,
                        "percent": thumbnail.stats.fraction() * 100.0,
                    },
                }))
            }
            Err(e) => Err(e),
        },
    };

    match report {
        Ok(json) => match serde_json::to_string_pretty(&json) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind().as_str(), e);
            ExitCode::FAILURE
        }
    }
}

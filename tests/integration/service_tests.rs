//! End-to-end tests of the thumbnail service.
//!
//! Tests verify:
//! - Only a small fraction of a large slide is fetched
//! - Directory caching keyed by ETag
//! - Output bounds, aspect ratio and determinism under concurrency
//! - Credential and missing-object failures

use std::sync::Arc;

use futures::future::join_all;

use wsi_thumbnailer::error::ErrorKind;
use wsi_thumbnailer::source::RemoteSource;
use wsi_thumbnailer::thumbnail::{DirectoryCache, ServiceConfig, ThumbnailService};

use super::test_utils::{aperio_slide, png_info, MockSlideSource, TestPage, TiffBuilder};

const SLIDE_URL: &str = "https://storage.googleapis.com/slides/case-2/slide.svs";

fn remote() -> RemoteSource {
    RemoteSource::parse(SLIDE_URL).unwrap()
}

// =============================================================================
// Fetch Volume
// =============================================================================

#[tokio::test]
async fn test_large_slide_fetches_under_one_percent() {
    let data = TiffBuilder::new()
        .add_page(TestPage::placeholder(46000, 32914).describe("Aperio Image Library |MPP = 0.25"))
        .add_page(TestPage::strips(200, 150).describe("Aperio Image Library thumbnail"))
        .with_padding(128 * 1024 * 1024)
        .build();
    let total = data.len() as u64;
    let source = MockSlideSource::new().with_slide(SLIDE_URL, data);
    let service = ThumbnailService::new(source.clone());

    let report = service.process(&remote(), 256).await.unwrap();

    let stats = report.thumbnail.stats;
    assert_eq!(stats.file_size, total);
    assert_eq!(stats.bytes_fetched, source.stats().bytes());
    assert!(
        stats.fraction() < 0.01,
        "fetched {} of {} bytes",
        stats.bytes_fetched,
        stats.file_size
    );
    assert_eq!(report.metadata.width, 46000);
    assert_eq!((report.thumbnail.width, report.thumbnail.height), (200, 150));
}

#[tokio::test]
async fn test_process_opens_slide_once() {
    let source = MockSlideSource::new().with_slide(SLIDE_URL, aperio_slide());
    let service = ThumbnailService::new(source.clone());

    let report = service.process(&remote(), 100).await.unwrap();

    assert_eq!(source.open_count(), 1);
    assert_eq!(report.metadata.vendor, "aperio");
    assert_eq!((report.thumbnail.width, report.thumbnail.height), (100, 75));
}

// =============================================================================
// Directory Cache
// =============================================================================

#[tokio::test]
async fn test_directory_reused_for_same_etag() {
    let source = MockSlideSource::new().with_tagged_slide(SLIDE_URL, aperio_slide(), "\"v1\"");
    let service = ThumbnailService::new(source.clone());

    service.metadata(&remote()).await.unwrap();
    let after_first = source.stats().requests();
    assert!(after_first > 0);

    service.metadata(&remote()).await.unwrap();
    assert_eq!(source.stats().requests(), after_first);
    assert_eq!(service.directory_cache().len().await, 1);
}

#[tokio::test]
async fn test_directory_cache_ignores_signature_query() {
    let source = MockSlideSource::new().with_tagged_slide(SLIDE_URL, aperio_slide(), "\"v1\"");
    let service = ThumbnailService::new(source.clone());

    let first = RemoteSource::parse(&format!("{}?X-Goog-Signature=aaa", SLIDE_URL)).unwrap();
    let second = RemoteSource::parse(&format!("{}?X-Goog-Signature=bbb", SLIDE_URL)).unwrap();

    service.metadata(&first).await.unwrap();
    let after_first = source.stats().requests();
    service.metadata(&second).await.unwrap();

    assert_eq!(source.stats().requests(), after_first);
}

#[tokio::test]
async fn test_directory_not_cached_without_etag() {
    let source = MockSlideSource::new().with_slide(SLIDE_URL, aperio_slide());
    let service = ThumbnailService::new(source.clone());

    service.metadata(&remote()).await.unwrap();
    let after_first = source.stats().requests();
    service.metadata(&remote()).await.unwrap();

    assert!(source.stats().requests() > after_first);
    assert!(service.directory_cache().is_empty().await);
}

// =============================================================================
// Output Shape
// =============================================================================

#[tokio::test]
async fn test_bounds_and_aspect_ratio() {
    let data = TiffBuilder::new()
        .add_page(TestPage::strips(300, 120))
        .build();
    let service = ThumbnailService::new(MockSlideSource::new().with_slide(SLIDE_URL, data));

    for max in [1, 16, 50, 99, 150, 299, 300, 1000] {
        let output = service.thumbnail(&remote(), max).await.unwrap();
        let (w, h, _) = png_info(&output.png);

        assert_eq!((w, h), (output.width, output.height));
        assert!(w.max(h) <= max.max(1), "max {} gave {}x{}", max, w, h);
        assert!(w >= 1 && h >= 1);
        if max >= 300 {
            assert_eq!((w, h), (300, 120));
        } else {
            assert_eq!(w, max);
            let expected_h = 120.0 * max as f64 / 300.0;
            assert!((h as f64 - expected_h).abs() <= 1.0, "max {} gave {}x{}", max, w, h);
        }
    }
}

#[tokio::test]
async fn test_zero_max_dimension_rejected() {
    let service = ThumbnailService::new(MockSlideSource::new().with_slide(SLIDE_URL, aperio_slide()));

    let err = service.thumbnail(&remote(), 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Render);
}

#[tokio::test]
async fn test_concurrent_requests_are_deterministic() {
    let service = Arc::new(ThumbnailService::new(
        MockSlideSource::new().with_slide(SLIDE_URL, aperio_slide()),
    ));

    let requests = (0..8).map(|_| {
        let service = Arc::clone(&service);
        async move { service.thumbnail(&remote(), 120).await.unwrap().png }
    });
    let results = join_all(requests).await;

    assert!(results.iter().all(|png| *png == results[0]));
    assert_eq!(png_info(&results[0]).0, 120);
}

#[tokio::test]
async fn test_blocking_decode_runs_on_worker_threads() {
    let service = Arc::new(ThumbnailService::with_config(
        MockSlideSource::new().with_slide(SLIDE_URL, aperio_slide()),
        ServiceConfig::default(),
        DirectoryCache::new(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.thumbnail(&remote(), 64).await.map(|o| o.png) })
        })
        .collect();

    let mut outputs = Vec::new();
    for handle in handles {
        outputs.push(handle.await.unwrap().unwrap());
    }
    assert!(outputs.windows(2).all(|pair| pair[0] == pair[1]));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_missing_slide_is_not_found() {
    let service = ThumbnailService::new(MockSlideSource::new());

    let err = service.metadata(&remote()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_private_slide_needs_credentials() {
    let source =
        MockSlideSource::new().with_private_slide(SLIDE_URL, aperio_slide(), "Bearer secret");
    let service = ThumbnailService::new(source);

    let err = service.metadata(&remote()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);

    let authorized = remote().with_bearer_token("secret");
    let metadata = service.metadata(&authorized).await.unwrap();
    assert_eq!(metadata.vendor, "aperio");
}

#[tokio::test]
async fn test_expired_credentials_rejected_before_fetching() {
    let source = MockSlideSource::new().with_slide(SLIDE_URL, aperio_slide());
    let service = ThumbnailService::new(source.clone());

    let expired = remote().with_expiry(std::time::SystemTime::UNIX_EPOCH);
    let err = service.metadata(&expired).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Permission);
    assert_eq!(source.open_count(), 0);
}

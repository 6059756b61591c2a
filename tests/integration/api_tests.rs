//! API integration tests for metadata, thumbnails and processing.
//!
//! Tests verify:
//! - Response bodies and headers of every route
//! - HTTP status codes for each failure class
//! - Credential forwarding and thumbnail persistence

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use wsi_thumbnailer::thumbnail::{
    thumbnail_location, MemoryThumbnailStore, ThumbnailService, ThumbnailStore,
};
use wsi_thumbnailer::{create_router, RouterConfig};

use super::test_utils::{aperio_slide, is_valid_png, png_info, MockSlideSource};

const SLIDE_URL: &str = "https://storage.googleapis.com/slides/case-3/slide.svs";
const PRIVATE_URL: &str = "https://storage.googleapis.com/private/case-4/slide.svs";

fn mock_source() -> MockSlideSource {
    MockSlideSource::new()
        .with_slide(SLIDE_URL, aperio_slide())
        .with_private_slide(PRIVATE_URL, aperio_slide(), "Bearer token-123")
        .with_slide(
            "https://storage.googleapis.com/slides/case-5/notes.svs",
            b"not a slide at all".to_vec(),
        )
}

fn router_with(config: RouterConfig) -> (Router, Arc<MemoryThumbnailStore>) {
    let store = Arc::new(MemoryThumbnailStore::new());
    let service = ThumbnailService::new(mock_source());
    let router = create_router(
        service,
        Arc::clone(&store) as Arc<dyn ThumbnailStore>,
        config.with_tracing(false),
    );
    (router, store)
}

fn router() -> Router {
    router_with(RouterConfig::default()).0
}

fn encode(url: &str) -> String {
    url::form_urlencoded::byte_serialize(url.as_bytes()).collect()
}

fn get(uri: String) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let response = router().oneshot(get("/health".into())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// =============================================================================
// Metadata
// =============================================================================

#[tokio::test]
async fn test_metadata_json() {
    let signed = format!("{}?X-Goog-Signature=abc", SLIDE_URL);
    let response = router()
        .oneshot(get(format!("/metadata?url={}", encode(&signed))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["width"], 46000);
    assert_eq!(json["height"], 32914);
    assert_eq!(json["vendor"], "aperio");
    assert_eq!(json["objective_power"], 20.0);
    assert!((json["mpp"].as_f64().unwrap() - 0.499).abs() < 1e-9);
    assert_eq!(json["source_url"], SLIDE_URL);
}

#[tokio::test]
async fn test_metadata_requires_url() {
    let response = router().oneshot(get("/metadata".into())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metadata_rejects_non_http_url() {
    let response = router()
        .oneshot(get(format!(
            "/metadata?url={}",
            encode("ftp://example.com/slide.svs")
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "invalid_request");
    assert_eq!(json["status"], 400);
}

// =============================================================================
// Thumbnails
// =============================================================================

#[tokio::test]
async fn test_thumbnail_png_and_headers() {
    let response = router()
        .oneshot(get(format!("/thumbnail?url={}", encode(SLIDE_URL))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get("content-type").unwrap(), "image/png");
    assert_eq!(headers.get("cache-control").unwrap(), "public, max-age=86400");
    assert_eq!(headers.get("x-thumbnail-page").unwrap(), "1");
    assert_eq!(headers.get("x-thumbnail-source").unwrap(), "explicit");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(is_valid_png(&body));
    assert_eq!(png_info(&body).0, 200);
}

#[tokio::test]
async fn test_thumbnail_max_size() {
    let response = router()
        .oneshot(get(format!(
            "/thumbnail?url={}&max_size=100",
            encode(SLIDE_URL)
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!((png_info(&body).0, png_info(&body).1), (100, 75));
}

#[tokio::test]
async fn test_thumbnail_max_size_clamped() {
    let response = router()
        .oneshot(get(format!("/thumbnail?url={}&max_size=1", encode(SLIDE_URL))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!((png_info(&body).0, png_info(&body).1), (16, 12));
}

#[tokio::test]
async fn test_thumbnail_default_size_from_config() {
    let (router, _) = router_with(RouterConfig::default().with_default_max_size(50));
    let response = router
        .oneshot(get(format!("/thumbnail?url={}", encode(SLIDE_URL))))
        .await
        .unwrap();

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(png_info(&body).0, 50);
}

// =============================================================================
// Error Statuses
// =============================================================================

#[tokio::test]
async fn test_missing_slide_returns_404() {
    let response = router()
        .oneshot(get(format!(
            "/thumbnail?url={}",
            encode("https://storage.googleapis.com/slides/missing.svs")
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn test_non_tiff_returns_415() {
    let response = router()
        .oneshot(get(format!(
            "/metadata?url={}",
            encode("https://storage.googleapis.com/slides/case-5/notes.svs")
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json = json_body(response).await;
    assert_eq!(json["error"], "unsupported_format");
}

#[tokio::test]
async fn test_private_slide_without_credentials_returns_403() {
    let response = router()
        .oneshot(get(format!("/metadata?url={}", encode(PRIVATE_URL))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = json_body(response).await;
    assert_eq!(json["error"], "permission_denied");
}

#[tokio::test]
async fn test_source_authorization_forwarded() {
    let request = Request::builder()
        .uri(format!("/metadata?url={}", encode(PRIVATE_URL)))
        .header("x-source-authorization", "Bearer token-123")
        .body(Body::empty())
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cors_allows_any_origin_by_default() {
    let request = Request::builder()
        .uri("/health")
        .header("origin", "https://viewer.example.com")
        .body(Body::empty())
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

// =============================================================================
// Processing
// =============================================================================

fn process_request(link: &str) -> Request<Body> {
    let body = serde_json::json!({
        "id": "req-1",
        "created_on": "2026-10-17T09:00:00Z",
        "image_bucket_link": link,
        "patient_id": "P-007",
        "slide_id": "S-42",
        "block_id": "B-3",
    });
    Request::builder()
        .method("POST")
        .uri("/process")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_process_stores_thumbnail_next_to_slide() {
    let (router, store) = router_with(RouterConfig::default());

    let response = router.oneshot(process_request(SLIDE_URL)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["id"], "req-1");
    assert_eq!(json["patient_id"], "P-007");
    assert_eq!(json["slide_id"], "S-42");
    assert_eq!(json["block_id"], "B-3");
    assert_eq!(json["metadata"]["vendor"], "aperio");
    assert_eq!(
        json["thumbnail_image_link"],
        "s3://slides/case-3/slide_thumbnail.png"
    );

    let url = url::Url::parse(SLIDE_URL).unwrap();
    let location = thumbnail_location(&url, None, None).unwrap();
    let png = store.get(&location).await.unwrap();
    assert!(is_valid_png(&png));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_process_uses_output_bucket() {
    let (router, store) = router_with(
        RouterConfig::default().with_output(Some("thumbs".into()), Some("out".into())),
    );

    let response = router.oneshot(process_request(SLIDE_URL)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(
        json["thumbnail_image_link"],
        "s3://thumbs/out/slide_thumbnail.png"
    );
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_process_failure_stores_nothing() {
    let (router, store) = router_with(RouterConfig::default());

    let response = router
        .oneshot(process_request(
            "https://storage.googleapis.com/slides/missing.svs",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_process_rejects_malformed_body() {
    let request = Request::builder()
        .method("POST")
        .uri("/process")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"id": "req-1"}"#))
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

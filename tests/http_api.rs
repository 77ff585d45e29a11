//! Router-level tests against the simulated backend

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use base64::Engine as _;
use rfshot::server::build_router;
use rfshot::simulated::{SimulatedFactory, SimulatedPage};
use rfshot::{CaptureService, PipelineSettings};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn service(page: SimulatedPage) -> (Arc<SimulatedFactory>, Arc<CaptureService>) {
    let factory = Arc::new(SimulatedFactory::new(page));
    let settings = PipelineSettings {
        asset_settle: Duration::ZERO,
        network_idle_quiet: Duration::ZERO,
        ..Default::default()
    };
    let service = Arc::new(CaptureService::new(factory.clone(), 2, settings));
    (factory, service)
}

async fn post(service: Arc<CaptureService>, body: &str) -> (StatusCode, Value) {
    let response = build_router(service)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scrape")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn successful_capture_envelope() {
    let mut page = SimulatedPage::new(2500);
    page.title = "Long Read".into();
    let (_, service) = service(page);

    let (status, json) = post(
        service,
        r#"{"url":"https://example.com/article","viewport_width":40,"viewport_height":500,
            "overlap_px":50,"settle_delay_ms":1,"image_format":"png"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert!(json.get("error").is_none());
    let data = &json["data"];
    assert_eq!(data["content_type"], "image/png");
    assert_eq!(data["title"], "Long Read");
    assert_eq!(data["final_url"], "https://example.com/article");
    assert_eq!(data["viewport"]["width"], 40);
    assert_eq!(data["viewport"]["height"], 500);
    assert_eq!(data["overlap_px"], 50);
    assert_eq!(data["settle_delay_ms"], 1);
    assert_eq!(data["total_height_px"], 2500);

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data["screenshot_base64"].as_str().unwrap())
        .unwrap();
    assert_eq!(&bytes[0..8], b"\x89PNG\r\n\x1a\n");
}

#[tokio::test]
async fn jpeg_is_the_default_format() {
    let (_, service) = service(SimulatedPage::new(300));
    let (status, json) = post(
        service,
        r#"{"url":"https://example.com","viewport_width":32,"viewport_height":200,"settle_delay_ms":1}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["content_type"], "image/jpeg");
    assert_eq!(json["data"]["overlap_px"], 140);
}

#[tokio::test]
async fn malformed_input_is_rejected() {
    let (factory, service) = service(SimulatedPage::new(300));
    for body in ["{not json", r#"{"timeout_ms":100}"#, r#"{"url":"https://x.test","image_format":"bmp"}"#] {
        let (status, json) = post(service.clone(), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(json["ok"], false);
        assert!(json["error"].as_str().unwrap().starts_with("Invalid input"));
        assert!(json.get("data").is_none());
    }
    assert_eq!(factory.sessions_opened(), 0);
}

#[tokio::test]
async fn blank_page_is_a_server_error() {
    let (factory, service) = service(SimulatedPage::new(0));
    let (status, json) = post(service, r#"{"url":"https://example.com/blank","settle_delay_ms":1}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["ok"], false);
    assert!(json["error"].as_str().unwrap().contains("height detection"));
    let log = factory.last_log().unwrap();
    assert!(log.captures.is_empty());
    assert!(log.closed);
}

#[tokio::test]
async fn navigation_failure_is_a_gateway_timeout() {
    let mut page = SimulatedPage::new(1000);
    page.fail_navigation = true;
    let (factory, service) = service(page);
    let (status, json) = post(service, r#"{"url":"https://unreachable.test"}"#).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["ok"], false);
    assert!(factory.last_log().unwrap().closed);
}

#[tokio::test]
async fn capture_failure_is_a_server_error() {
    let mut page = SimulatedPage::new(4000);
    page.fail_capture_at = Some(1);
    let (factory, service) = service(page);
    let (status, json) = post(
        service,
        r#"{"url":"https://example.com","viewport_width":16,"viewport_height":500,"settle_delay_ms":1}"#,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().starts_with("Capture failed"));
    assert!(factory.last_log().unwrap().closed);
}

#[tokio::test]
async fn block_media_reaches_the_session() {
    let (factory, service) = service(SimulatedPage::new(100));
    let (status, _) = post(
        service,
        r#"{"url":"https://example.com","viewport_width":16,"viewport_height":100,"settle_delay_ms":1,"block_media":true}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(factory.last_log().unwrap().media_blocked);
}

#[tokio::test]
async fn health_and_method_checks() {
    let (_, service) = service(SimulatedPage::new(100));
    let router = build_router(service);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(Request::builder().uri("/scrape").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()["allow"], "POST");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["ok"], false);
    assert!(json["error"].as_str().unwrap().contains("GET"));
    assert!(json.get("data").is_none());
}

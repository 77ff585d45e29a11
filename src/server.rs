//! HTTP transport
//!
//! `POST /scrape` takes a JSON capture request and answers
//! `{ "ok": true, "data": {...} }` or `{ "ok": false, "error": "..." }` with a
//! status reflecting the failure class. `GET /health` is a liveness probe.

use crate::pipeline::CaptureResult;
use crate::{CaptureRequest, CaptureService, Error, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (e.g. "0.0.0.0")
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Returns the socket address string "host:port".
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Response envelope shared by success and failure.
#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CaptureResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapeResponse {
    pub fn success(data: CaptureResult) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(err: &Error) -> Self {
        Self::rejected(err.to_string())
    }

    fn rejected(message: String) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Maps an `Error` to its HTTP status and JSON error body.
pub fn error_response(err: &Error) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Capture failed: {}", err);
    } else {
        warn!("Rejected capture request: {}", err);
    }
    (status, Json(ScrapeResponse::failure(err))).into_response()
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "ok": true })))
}

/// Non-POST requests to `/scrape` get the JSON envelope too.
pub async fn method_not_allowed(method: Method) -> Response {
    warn!("Rejected {} /scrape", method);
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        Json(ScrapeResponse::rejected(format!(
            "Method {} not allowed, use POST",
            method
        ))),
    )
        .into_response()
}

pub async fn scrape(State(service): State<Arc<CaptureService>>, body: Bytes) -> Response {
    let request = match CaptureRequest::from_json(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    info!(
        "Capture requested: {} ({}x{}, overlap {}px, {:?})",
        request.url,
        request.viewport.width,
        request.viewport.height,
        request.overlap_px,
        request.image_format
    );
    match service.capture(request).await {
        Ok(data) => (StatusCode::OK, Json(ScrapeResponse::success(data))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Build the router with all endpoint routes.
pub fn build_router(service: Arc<CaptureService>) -> Router {
    Router::new()
        .route("/scrape", post(scrape).fallback(method_not_allowed))
        .route("/health", get(health))
        .with_state(service)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &ServerConfig, service: Arc<CaptureService>) -> Result<()> {
    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::InitializationError(format!("Failed to bind {}: {}", addr, e)))?;
    info!("Listening on {}", addr);

    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await
        .map_err(|e| Error::Other(format!("Server error: {}", e)))
}

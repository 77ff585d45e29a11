//! Capture request parsing and normalization
//!
//! The wire body is deliberately loose (every field optional, numbers signed)
//! so that defaults can be substituted for absent or non-positive values the
//! same way regardless of how the caller spelled the request.

use crate::{Error, Result, Viewport};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1024;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 300;
pub const DEFAULT_OVERLAP_PX: u32 = 140;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const MAX_JPEG_QUALITY: u8 = 95;

/// Output image format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Parse a format name; empty selects the default.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            other => Err(Error::InvalidInput(format!(
                "unsupported image_format '{}' (expected \"jpeg\" or \"png\")",
                other
            ))),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// JSON body accepted by the scrape endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureRequestBody {
    pub url: Option<String>,
    pub timeout_ms: Option<i64>,
    pub viewport_width: Option<i64>,
    pub viewport_height: Option<i64>,
    pub settle_delay_ms: Option<i64>,
    pub overlap_px: Option<i64>,
    pub image_format: Option<String>,
    pub jpeg_quality: Option<i64>,
    pub block_media: Option<bool>,
    pub wait_until_netidle: Option<bool>,
}

/// Immutable per-call configuration with every default already applied.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Absolute http(s) URL to capture
    pub url: String,
    /// Overall budget for the whole pipeline
    pub timeout: Duration,
    /// Viewport used for every tile
    pub viewport: Viewport,
    /// Wait after each scroll before capturing
    pub settle_delay: Duration,
    /// Pixel band duplicated between consecutive tiles
    pub overlap_px: u32,
    pub image_format: ImageFormat,
    /// JPEG quality in `1..=95`; ignored for PNG
    pub jpeg_quality: u8,
    /// Abort audio/video requests for this session
    pub block_media: bool,
    /// Pause briefly after navigation so trailing requests can finish
    pub wait_until_network_idle: bool,
}

fn positive_or(value: Option<i64>, default: u64) -> u64 {
    match value {
        Some(v) if v > 0 => v as u64,
        _ => default,
    }
}

fn positive_u32_or(field: &str, value: Option<i64>, default: u32) -> Result<u32> {
    match value {
        Some(v) if v > 0 => u32::try_from(v)
            .map_err(|_| Error::InvalidInput(format!("{} out of range: {}", field, v))),
        _ => Ok(default),
    }
}

impl CaptureRequest {
    /// Build a request for `url` with every other field defaulted.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::from_body(CaptureRequestBody {
            url: Some(url.into()),
            ..Default::default()
        })
    }

    /// Validate a decoded body and substitute defaults.
    pub fn from_body(body: CaptureRequestBody) -> Result<Self> {
        let raw_url = body
            .url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput("missing required field 'url'".into()))?;

        let parsed = url::Url::parse(raw_url)
            .map_err(|e| Error::InvalidInput(format!("invalid url '{}': {}", raw_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "unsupported url scheme '{}'",
                parsed.scheme()
            )));
        }

        let image_format = ImageFormat::parse(body.image_format.as_deref().unwrap_or(""))?;

        let jpeg_quality = match body.jpeg_quality {
            Some(q) if q > 0 => q.min(MAX_JPEG_QUALITY as i64) as u8,
            _ => DEFAULT_JPEG_QUALITY,
        };

        Ok(Self {
            url: parsed.to_string(),
            timeout: Duration::from_millis(positive_or(body.timeout_ms, DEFAULT_TIMEOUT_MS)),
            viewport: Viewport {
                width: positive_u32_or("viewport_width", body.viewport_width, DEFAULT_VIEWPORT_WIDTH)?,
                height: positive_u32_or("viewport_height", body.viewport_height, DEFAULT_VIEWPORT_HEIGHT)?,
            },
            settle_delay: Duration::from_millis(positive_or(body.settle_delay_ms, DEFAULT_SETTLE_DELAY_MS)),
            overlap_px: positive_u32_or("overlap_px", body.overlap_px, DEFAULT_OVERLAP_PX)?,
            image_format,
            jpeg_quality,
            block_media: body.block_media.unwrap_or(false),
            wait_until_network_idle: body.wait_until_netidle.unwrap_or(true),
        })
    }

    /// Decode and validate a raw JSON body.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let body: CaptureRequestBody = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidInput(format!("invalid JSON: {}", e)))?;
        Self::from_body(body)
    }

    /// Sub-timeout for the asset-readiness wait: a quarter of the overall
    /// budget, kept within 2..=8 seconds.
    pub fn asset_wait_timeout(&self) -> Duration {
        (self.timeout / 4).clamp(Duration::from_secs(2), Duration::from_secs(8))
    }
}

//! Capture pipeline
//!
//! navigate → normalize → measure → (scroll/capture → stitch | native capture)
//! → encode, strictly in sequence on one session, under one overall deadline.

use crate::encode;
use crate::height;
use crate::readiness;
use crate::scheduler::{self, DEFAULT_MIN_STEP_PX};
use crate::session::{PageSession, SessionFactory, SessionLease, SessionOptions};
use crate::stitch::{self, CompositeImage, Tile};
use crate::{CaptureRequest, Error, Result, Viewport};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Overall budget for one request, started when the pipeline starts.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    /// Fail with `Timeout` once the budget is spent.
    pub fn check(&self) -> Result<()> {
        if self.remaining().is_zero() {
            Err(Error::Timeout(self.budget.as_millis() as u64))
        } else {
            Ok(())
        }
    }

    /// Check the budget and bound the session's next call by what is left.
    pub fn arm(&self, session: &mut dyn PageSession) -> Result<()> {
        self.check()?;
        session.set_call_timeout(self.remaining());
        Ok(())
    }

    /// Report a failed call as `Timeout` when it ran past the budget.
    pub fn classify(&self, err: Error) -> Error {
        match self.check() {
            Err(timeout) => timeout,
            Ok(()) => err,
        }
    }

    /// Sleep for `delay`, truncated to the remaining budget.
    pub fn sleep(&self, delay: Duration) -> Result<()> {
        let wait = delay.min(self.remaining());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        self.check()
    }
}

/// Service-level knobs that are not part of an individual request.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Smallest acceptable scroll step before the 3/4-viewport fallback
    pub min_step_px: u32,
    /// Pause between the presentation scripts and the asset wait
    pub asset_settle: Duration,
    /// Quiet period after navigation when the request asks for network idle
    pub network_idle_quiet: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_step_px: DEFAULT_MIN_STEP_PX,
            asset_settle: Duration::from_millis(600),
            network_idle_quiet: Duration::from_millis(300),
        }
    }
}

/// How the composite is produced for a given session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    /// The backend captures the whole document in one shot
    NativeFullPage,
    /// Scroll through the page in overlapping tiles and stitch them
    ScrollAndStitch,
}

impl CaptureStrategy {
    pub fn select(session: &dyn PageSession) -> Self {
        if session.supports_full_page_capture() {
            CaptureStrategy::NativeFullPage
        } else {
            CaptureStrategy::ScrollAndStitch
        }
    }
}

/// Output envelope of a successful capture.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub screenshot_base64: String,
    pub content_type: String,
    pub title: String,
    pub final_url: String,
    pub viewport: Viewport,
    pub overlap_px: u32,
    pub settle_delay_ms: u64,
    pub total_height_px: u32,
}

/// Open a session from `factory`, capture `request` with it and close it,
/// whatever the outcome.
pub fn capture(
    factory: &dyn SessionFactory,
    request: &CaptureRequest,
    settings: &PipelineSettings,
) -> Result<CaptureResult> {
    let deadline = Deadline::start(request.timeout);
    let mut lease = SessionLease::open(
        factory,
        SessionOptions {
            viewport: request.viewport,
            block_media: request.block_media,
        },
    )?;
    let result = capture_with(lease.session(), request, settings, &deadline);
    if let Err(e) = lease.close() {
        warn!("Failed to close browser session for {}: {}", request.url, e);
    }
    result
}

/// Run the pipeline on a session opened with the request's options.
pub fn capture_with(
    session: &mut dyn PageSession,
    request: &CaptureRequest,
    settings: &PipelineSettings,
    deadline: &Deadline,
) -> Result<CaptureResult> {
    let started = Instant::now();

    navigate(session, request, settings, deadline)?;

    readiness::normalize(session, request, settings.asset_settle, deadline)?;

    deadline.arm(session)?;
    let total_height = height::measure(session).map_err(|e| deadline.classify(e))?;

    let strategy = CaptureStrategy::select(session);
    debug!("Capturing {} with {:?}", request.url, strategy);
    let composite = match strategy {
        CaptureStrategy::NativeFullPage => native_capture(session, total_height, deadline)?,
        CaptureStrategy::ScrollAndStitch => {
            let tiles = scheduler::capture_tiles(
                session,
                request,
                total_height,
                settings.min_step_px,
                deadline,
            )?;
            stitch::stitch(tiles, request.overlap_px)?
        }
    };

    deadline.check()?;
    let encoded = encode::encode(&composite, request.image_format, request.jpeg_quality)?;

    deadline.arm(session)?;
    let title = session.title().unwrap_or_else(|e| {
        warn!("Failed to read page title: {}", e);
        String::new()
    });
    let final_url = session.current_url().unwrap_or_else(|e| {
        warn!("Failed to read final URL: {}", e);
        request.url.clone()
    });

    info!(
        "Captured {} ({}px tall, {}x{} composite, {} bytes {}) in {}ms",
        final_url,
        total_height,
        composite.width(),
        composite.height(),
        encoded.bytes.len(),
        encoded.content_type,
        started.elapsed().as_millis()
    );

    Ok(CaptureResult {
        screenshot_base64: encoded.to_base64(),
        content_type: encoded.content_type.to_string(),
        title,
        final_url,
        viewport: request.viewport,
        overlap_px: request.overlap_px,
        settle_delay_ms: request.settle_delay.as_millis() as u64,
        total_height_px: total_height,
    })
}

fn navigate(
    session: &mut dyn PageSession,
    request: &CaptureRequest,
    settings: &PipelineSettings,
    deadline: &Deadline,
) -> Result<()> {
    deadline.arm(session)?;
    session
        .navigate(&request.url, deadline.remaining())
        .map_err(|e| match e {
            Error::NavigationTimeout(_) => e,
            other => Error::NavigationTimeout(other.to_string()),
        })?;
    if request.wait_until_network_idle {
        deadline.sleep(settings.network_idle_quiet)?;
    }
    Ok(())
}

fn native_capture(
    session: &mut dyn PageSession,
    total_height: u32,
    deadline: &Deadline,
) -> Result<CompositeImage> {
    deadline.arm(session)?;
    let png = session
        .capture_full_page(total_height)
        .map_err(|e| deadline.classify(e.into_capture_failure("full-page capture")))?;
    let tile = Tile::decode(&png, 0)?;
    Ok(CompositeImage::from_image(tile.image))
}

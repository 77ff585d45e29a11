//! Browser session abstraction
//!
//! A `PageSession` is one browser tab bound to one capture request. The
//! pipeline drives it strictly sequentially; it is never shared between
//! requests. Backends (CDP, simulated) implement the trait and are handed out
//! by a `SessionFactory`, wrapped in a `SessionLease` that closes them on every
//! exit path.

use crate::{Error, Result, Viewport};
use std::time::Duration;

/// Per-session options derived from the request.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub viewport: Viewport,
    pub block_media: bool,
}

/// Core trait for browser automation backends.
pub trait PageSession: Send {
    /// Emulate the given viewport for subsequent navigation and captures
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    /// Upper bound for each subsequent backend call (scroll, evaluate,
    /// capture). The pipeline refreshes it with the remaining request budget
    /// before every call.
    fn set_call_timeout(&mut self, timeout: Duration) {
        let _ = timeout;
    }

    /// Navigate and wait for the document body, bounded by `timeout`
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Evaluate JavaScript in the page and return its JSON value
    fn evaluate(&mut self, script: &str, await_promise: bool) -> Result<serde_json::Value>;

    /// Wait until fonts are loaded and discovered images have decoded or
    /// errored. Returns an error when `timeout` elapses first.
    fn wait_for_assets(&mut self, timeout: Duration) -> Result<()> {
        self.evaluate(&crate::readiness::asset_wait_script(timeout), true)?;
        Ok(())
    }

    /// Scroll the document to vertical offset `y`
    fn scroll_to(&mut self, y: u32) -> Result<()> {
        self.evaluate(&format!("window.scrollTo(0, {})", y), false)?;
        Ok(())
    }

    /// Scroll to the document's true bottom and report the resulting offset
    fn scroll_to_bottom(&mut self) -> Result<u32> {
        let value = self.evaluate(
            r#"(function() {
                window.scrollTo(0, document.documentElement.scrollHeight);
                return window.scrollY || window.pageYOffset || 0;
            })()"#,
            false,
        )?;
        Ok(value.as_f64().unwrap_or(0.0).max(0.0).round() as u32)
    }

    /// Capture the current viewport as PNG bytes
    fn capture_viewport(&mut self) -> Result<Vec<u8>>;

    /// Whether the backend can capture the whole document in one shot
    fn supports_full_page_capture(&self) -> bool {
        false
    }

    /// Capture the whole document (`height` pixels tall) as PNG bytes
    fn capture_full_page(&mut self, height: u32) -> Result<Vec<u8>> {
        let _ = height;
        Err(Error::CaptureFailed(
            "backend does not support full-page capture".into(),
        ))
    }

    /// Abort audio/video network requests for the rest of the session
    fn block_media(&mut self) -> Result<()> {
        Ok(())
    }

    fn title(&mut self) -> Result<String>;

    /// URL of the current document after redirects
    fn current_url(&mut self) -> Result<String>;

    /// Release the tab and its browsing context. Must be idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Hands out isolated sessions, typically from one shared browser process.
pub trait SessionFactory: Send + Sync {
    fn open(&self, options: SessionOptions) -> Result<Box<dyn PageSession>>;
}

/// Exclusive ownership of one open session; closes it when dropped.
pub struct SessionLease {
    session: Option<Box<dyn PageSession>>,
}

impl SessionLease {
    pub fn open(factory: &dyn SessionFactory, options: SessionOptions) -> Result<Self> {
        let session = factory.open(options)?;
        Ok(Self {
            session: Some(session),
        })
    }

    pub fn session(&mut self) -> &mut dyn PageSession {
        // Only `close` takes the session out, and it consumes the lease.
        match self.session.as_mut() {
            Some(s) => s.as_mut(),
            None => unreachable!("session lease used after close"),
        }
    }

    /// Close the session now, surfacing the backend's close error.
    pub fn close(mut self) -> Result<()> {
        match self.session.take() {
            Some(mut s) => s.close(),
            None => Ok(()),
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(mut s) = self.session.take() {
            if let Err(e) = s.close() {
                log::warn!("Failed to close browser session: {}", e);
            }
        }
    }
}

//! Deterministic in-memory browser backend
//!
//! `SimulatedSession` models a page of fixed height whose every document row
//! is painted with a color derived from its y coordinate, so stitched output
//! can be checked pixel by pixel without launching Chrome. Each session keeps a
//! `SessionLog` of what the pipeline asked it to do.

use crate::session::{PageSession, SessionFactory, SessionOptions};
use crate::{height, readiness, Error, Result, Viewport};
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Description of the simulated document and its failure knobs.
#[derive(Debug, Clone)]
pub struct SimulatedPage {
    /// Document height reported before lazy content resolves
    pub height: u32,
    pub title: String,
    /// URL reported after navigation (models redirects)
    pub final_url: Option<String>,
    /// Extra height that appears once lazy images are forced eager
    pub lazy_growth: u32,
    /// Widths returned by successive viewport captures (cycled); empty uses the viewport width
    pub capture_widths: Vec<u32>,
    /// Zero-based viewport capture index that fails
    pub fail_capture_at: Option<usize>,
    pub fail_navigation: bool,
    /// Asset wait reports its own sub-timeout instead of completing
    pub asset_wait_times_out: bool,
    /// Presentation scripts throw
    pub scripts_fail: bool,
    /// Advertise a native full-page capture primitive
    pub full_page_capture: bool,
    /// Latency of each navigation
    pub navigate_delay: Duration,
    /// Latency of each viewport or full-page capture
    pub capture_delay: Duration,
}

impl SimulatedPage {
    pub fn new(height: u32) -> Self {
        Self {
            height,
            title: "Simulated Page".to_string(),
            final_url: None,
            lazy_growth: 0,
            capture_widths: Vec::new(),
            fail_capture_at: None,
            fail_navigation: false,
            asset_wait_times_out: false,
            scripts_fail: false,
            full_page_capture: false,
            navigate_delay: Duration::ZERO,
            capture_delay: Duration::ZERO,
        }
    }
}

/// Record of the commands one session received.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    pub viewport: Option<Viewport>,
    pub viewport_sets: usize,
    pub navigations: Vec<String>,
    pub scripts: usize,
    pub asset_waits: Vec<Duration>,
    /// Offsets the document actually scrolled to
    pub scrolls: Vec<u32>,
    /// Offsets at which viewport captures were taken
    pub captures: Vec<u32>,
    pub full_page_captures: usize,
    pub media_blocked: bool,
    pub closed: bool,
    pub close_calls: usize,
    /// Last per-call bound handed down by the pipeline
    pub call_timeout: Option<Duration>,
}

/// Color of document row `y`; distinct for every row below 65536.
pub fn row_color(y: u32) -> Rgba<u8> {
    Rgba([(y % 256) as u8, ((y / 256) % 256) as u8, 0x5a, 0xff])
}

/// Open/peak session counters shared between a factory and its sessions.
#[derive(Debug, Default)]
struct OpenSessions {
    open: AtomicUsize,
    peak: AtomicUsize,
}

impl OpenSessions {
    fn opened(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SimulatedSession {
    page: SimulatedPage,
    viewport: Viewport,
    height: u32,
    scroll: u32,
    call_timeout: Option<Duration>,
    closed: bool,
    log: Arc<Mutex<SessionLog>>,
    counters: Arc<OpenSessions>,
}

impl SimulatedSession {
    pub fn new(page: SimulatedPage, options: SessionOptions) -> Self {
        Self::tracked(page, options, Arc::new(OpenSessions::default()))
    }

    fn tracked(page: SimulatedPage, options: SessionOptions, counters: Arc<OpenSessions>) -> Self {
        counters.opened();
        let height = page.height;
        Self {
            page,
            viewport: options.viewport,
            height,
            scroll: 0,
            call_timeout: None,
            closed: false,
            log: Arc::new(Mutex::new(SessionLog::default())),
            counters,
        }
    }

    /// Shared handle to this session's log; stays readable after close.
    pub fn log_handle(&self) -> Arc<Mutex<SessionLog>> {
        self.log.clone()
    }

    fn record<F: FnOnce(&mut SessionLog)>(&self, f: F) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
    }

    /// Sleep for `delay`, cut short by `bound`; a cut-short call fails the
    /// way a CDP command does when the tab timeout fires.
    fn stall(&self, what: &str, delay: Duration, bound: Option<Duration>) -> Result<()> {
        if delay.is_zero() {
            return Ok(());
        }
        let wait = bound.map_or(delay, |b| delay.min(b));
        std::thread::sleep(wait);
        if wait < delay {
            return Err(Error::CaptureFailed(format!(
                "{} timed out after {}ms",
                what,
                wait.as_millis()
            )));
        }
        Ok(())
    }

    fn max_scroll(&self) -> u32 {
        self.height.saturating_sub(self.viewport.height)
    }

    fn render(&self, width: u32, top: u32, rows: u32) -> Result<Vec<u8>> {
        let img = RgbaImage::from_fn(width, rows, |_, row| {
            let y = top + row;
            if y < self.height {
                row_color(y)
            } else {
                Rgba([0xff, 0xff, 0xff, 0xff])
            }
        });
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(&img, width, rows, image::ExtendedColorType::Rgba8)
            .map_err(|e| Error::Other(format!("simulated raster failed: {}", e)))?;
        Ok(png)
    }
}

impl PageSession for SimulatedSession {
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.viewport = viewport;
        self.record(|l| {
            l.viewport = Some(viewport);
            l.viewport_sets += 1;
        });
        Ok(())
    }

    fn set_call_timeout(&mut self, timeout: Duration) {
        self.call_timeout = Some(timeout);
        self.record(|l| l.call_timeout = Some(timeout));
    }

    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.record(|l| l.navigations.push(url.to_string()));
        if self.page.fail_navigation {
            return Err(Error::Other("net::ERR_TIMED_OUT".into()));
        }
        self.stall("navigation", self.page.navigate_delay, Some(timeout))
    }

    fn evaluate(&mut self, script: &str, _await_promise: bool) -> Result<serde_json::Value> {
        if script == height::SCROLL_HEIGHT_JS {
            return Ok(serde_json::json!(self.height));
        }
        self.record(|l| l.scripts += 1);
        if self.page.scripts_fail {
            return Err(Error::ScriptError("Uncaught TypeError: document.head is null".into()));
        }
        if script == readiness::FORCE_EAGER_LOADING_JS {
            self.height += self.page.lazy_growth;
        }
        Ok(serde_json::Value::Null)
    }

    fn wait_for_assets(&mut self, timeout: Duration) -> Result<()> {
        self.record(|l| l.asset_waits.push(timeout));
        if self.page.asset_wait_times_out {
            return Err(Error::ScriptError("Uncaught Error: assets-timeout".into()));
        }
        Ok(())
    }

    fn scroll_to(&mut self, y: u32) -> Result<()> {
        self.scroll = y.min(self.max_scroll());
        let at = self.scroll;
        self.record(|l| l.scrolls.push(at));
        Ok(())
    }

    fn scroll_to_bottom(&mut self) -> Result<u32> {
        self.scroll = self.max_scroll();
        let at = self.scroll;
        self.record(|l| l.scrolls.push(at));
        Ok(at)
    }

    fn capture_viewport(&mut self) -> Result<Vec<u8>> {
        self.stall("viewport capture", self.page.capture_delay, self.call_timeout)?;
        let index = self.log.lock().map(|l| l.captures.len()).unwrap_or(0);
        if self.page.fail_capture_at == Some(index) {
            return Err(Error::Other(format!("Screenshot failed at capture {}", index)));
        }
        let width = if self.page.capture_widths.is_empty() {
            self.viewport.width
        } else {
            self.page.capture_widths[index % self.page.capture_widths.len()]
        };
        let png = self.render(width, self.scroll, self.viewport.height)?;
        let at = self.scroll;
        self.record(|l| l.captures.push(at));
        Ok(png)
    }

    fn supports_full_page_capture(&self) -> bool {
        self.page.full_page_capture
    }

    fn capture_full_page(&mut self, height: u32) -> Result<Vec<u8>> {
        if !self.page.full_page_capture {
            return Err(Error::CaptureFailed("full-page capture unsupported".into()));
        }
        self.stall("full-page capture", self.page.capture_delay, self.call_timeout)?;
        let png = self.render(self.viewport.width, 0, height.max(1))?;
        self.record(|l| l.full_page_captures += 1);
        Ok(png)
    }

    fn block_media(&mut self) -> Result<()> {
        self.record(|l| l.media_blocked = true);
        Ok(())
    }

    fn title(&mut self) -> Result<String> {
        Ok(self.page.title.clone())
    }

    fn current_url(&mut self) -> Result<String> {
        if let Some(url) = &self.page.final_url {
            return Ok(url.clone());
        }
        let log = self
            .log
            .lock()
            .map_err(|_| Error::Other("session log poisoned".into()))?;
        Ok(log.navigations.last().cloned().unwrap_or_else(|| "about:blank".into()))
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.counters.closed();
        }
        self.record(|l| {
            l.closed = true;
            l.close_calls += 1;
        });
        Ok(())
    }
}

/// Factory producing `SimulatedSession`s that all render the same page.
pub struct SimulatedFactory {
    page: SimulatedPage,
    logs: Mutex<Vec<Arc<Mutex<SessionLog>>>>,
    counters: Arc<OpenSessions>,
}

impl SimulatedFactory {
    pub fn new(page: SimulatedPage) -> Self {
        Self {
            page,
            logs: Mutex::new(Vec::new()),
            counters: Arc::new(OpenSessions::default()),
        }
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at the same time.
    pub fn peak_open_sessions(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.logs.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Snapshot of the most recently opened session's log.
    pub fn last_log(&self) -> Option<SessionLog> {
        let logs = self.logs.lock().ok()?;
        let last = logs.last()?;
        let log = last.lock().ok()?;
        Some(log.clone())
    }
}

impl SessionFactory for SimulatedFactory {
    fn open(&self, options: SessionOptions) -> Result<Box<dyn PageSession>> {
        let mut session = SimulatedSession::tracked(self.page.clone(), options, self.counters.clone());
        session.set_viewport(options.viewport)?;
        if options.block_media {
            session.block_media()?;
        }
        self.logs
            .lock()
            .map_err(|_| Error::InitializationError("simulated factory poisoned".into()))?
            .push(session.log_handle());
        Ok(Box::new(session))
    }
}

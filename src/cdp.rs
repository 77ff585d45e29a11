//! Chrome DevTools Protocol backend

use crate::session::{PageSession, SessionFactory, SessionOptions};
use crate::{Error, Result, Viewport};
use headless_chrome::browser::tab::{RequestInterceptor, RequestPausedDecision, Tab};
use headless_chrome::protocol::cdp::Emulation;
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::FailRequest;
use headless_chrome::protocol::cdp::Network::{ErrorReason, ResourceType};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::protocol::cdp::Target;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Keep the shared browser alive between requests.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24);

/// Launch configuration for the shared browser process.
#[derive(Debug, Clone, Default)]
pub struct CdpConfig {
    /// Chrome/Chromium executable; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Run Chrome with its sandbox enabled
    pub sandbox: bool,
    /// Capture whole documents in one shot instead of scrolling and stitching
    pub native_full_page: bool,
}

/// One headless Chrome process shared by many short-lived sessions.
///
/// Every session gets its own browser context (incognito profile) and tab,
/// so requests never see each other's cookies or storage.
pub struct CdpBrowser {
    browser: Mutex<Browser>,
    config: CdpConfig,
}

fn launch(config: &CdpConfig) -> Result<Browser> {
    let launch_options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(config.sandbox)
        .path(config.chrome_path.clone())
        .idle_browser_timeout(BROWSER_IDLE_TIMEOUT)
        .args(vec![OsStr::new("--disable-gpu")])
        .build()
        .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

    Browser::new(launch_options)
        .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))
}

impl CdpBrowser {
    pub fn launch(config: CdpConfig) -> Result<Self> {
        let browser = launch(&config)?;
        info!("Launched headless Chrome");
        Ok(Self {
            browser: Mutex::new(browser),
            config,
        })
    }

    fn open_in(browser: &Browser, config: &CdpConfig) -> Result<CdpSession> {
        let context = browser
            .new_context()
            .map_err(|e| Error::InitializationError(format!("Failed to create browser context: {}", e)))?;
        let context_id = context.get_id().to_string();
        let tab = context
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;
        debug!("Opened tab in browser context {}", context_id);
        Ok(CdpSession {
            browser: browser.clone(),
            tab,
            context_id,
            viewport: Viewport::default(),
            native_full_page: config.native_full_page,
            closed: false,
        })
    }
}

impl SessionFactory for CdpBrowser {
    fn open(&self, options: SessionOptions) -> Result<Box<dyn PageSession>> {
        let mut browser = self
            .browser
            .lock()
            .map_err(|_| Error::InitializationError("browser lock poisoned".into()))?;

        let mut session = match Self::open_in(&browser, &self.config) {
            Ok(s) => s,
            Err(e) => {
                // The shared process may have died; relaunch once.
                warn!("Opening session failed ({}); relaunching browser", e);
                *browser = launch(&self.config)?;
                Self::open_in(&browser, &self.config)?
            }
        };
        drop(browser);

        session.set_viewport(options.viewport)?;
        if options.block_media {
            if let Err(e) = session.block_media() {
                warn!("Failed to enable media blocking: {}", e);
            }
        }
        Ok(Box::new(session))
    }
}

/// One tab in its own browser context.
pub struct CdpSession {
    browser: Browser,
    tab: Arc<Tab>,
    context_id: String,
    viewport: Viewport,
    native_full_page: bool,
    closed: bool,
}

impl CdpSession {
    fn override_metrics(&self, width: u32, height: u32) -> Result<()> {
        self.tab
            .call_method(Emulation::SetDeviceMetricsOverride {
                width,
                height,
                device_scale_factor: 1.0,
                mobile: false,
                scale: None,
                screen_width: None,
                screen_height: None,
                position_x: None,
                position_y: None,
                dont_set_visible_size: None,
                screen_orientation: None,
                viewport: None,
                display_feature: None,
                device_posture: None,
            })
            .map_err(|e| Error::CdpError(format!("Failed to set device metrics: {}", e)))?;
        Ok(())
    }
}

impl PageSession for CdpSession {
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.override_metrics(viewport.width, viewport.height)?;
        self.viewport = viewport;
        Ok(())
    }

    fn set_call_timeout(&mut self, timeout: Duration) {
        self.tab.set_default_timeout(timeout);
    }

    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.tab.set_default_timeout(timeout);

        self.tab
            .navigate_to(url)
            .map_err(|e| Error::NavigationTimeout(format!("Navigation failed: {}", e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::NavigationTimeout(format!("Wait for navigation failed: {}", e)))?;

        self.tab
            .wait_for_element("body")
            .map_err(|e| Error::NavigationTimeout(format!("Document body never appeared: {}", e)))?;

        Ok(())
    }

    fn evaluate(&mut self, script: &str, await_promise: bool) -> Result<serde_json::Value> {
        let result = self
            .tab
            .evaluate(script, await_promise)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;
        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }

    fn capture_viewport(&mut self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| Error::CaptureFailed(format!("Screenshot failed: {}", e)))
    }

    fn supports_full_page_capture(&self) -> bool {
        self.native_full_page
    }

    fn capture_full_page(&mut self, height: u32) -> Result<Vec<u8>> {
        // Grow the emulated viewport to the whole document, then restore it.
        self.override_metrics(self.viewport.width, height.max(1))?;
        let shot = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| Error::CaptureFailed(format!("Full-page screenshot failed: {}", e)));
        let restored = self.override_metrics(self.viewport.width, self.viewport.height);
        let png = shot?;
        restored?;
        Ok(png)
    }

    fn block_media(&mut self) -> Result<()> {
        self.tab
            .enable_fetch(None, Some(false))
            .map_err(|e| Error::CdpError(format!("Failed to enable fetch domain: {}", e)))?;

        let interceptor: Arc<dyn RequestInterceptor + Send + Sync> = Arc::new(
            move |_transport, _session_id, event: RequestPausedEvent| {
                if matches!(event.params.resource_Type, ResourceType::Media) {
                    debug!("Blocking media request {}", event.params.request.url);
                    RequestPausedDecision::Fail(FailRequest {
                        request_id: event.params.request_id.clone(),
                        error_reason: ErrorReason::BlockedByClient,
                    })
                } else {
                    RequestPausedDecision::Continue(None)
                }
            },
        );

        self.tab
            .enable_request_interception(interceptor)
            .map_err(|e| Error::CdpError(format!("Failed to enable request interception: {}", e)))?;
        Ok(())
    }

    fn title(&mut self) -> Result<String> {
        self.tab
            .get_title()
            .map_err(|e| Error::CdpError(format!("Failed to get title: {}", e)))
    }

    fn current_url(&mut self) -> Result<String> {
        Ok(self.tab.get_url())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.tab.close(false) {
            warn!("Failed to close tab: {}", e);
        }
        self.browser
            .call_method(Target::DisposeBrowserContext {
                browser_context_id: self.context_id.clone(),
            })
            .map_err(|e| Error::CdpError(format!("Failed to dispose browser context: {}", e)))?;
        debug!("Disposed browser context {}", self.context_id);
        Ok(())
    }
}

//! RFox full-page capture
//!
//! Renders a web page in headless Chrome and produces one full-height
//! screenshot, even for pages much taller than the viewport, by scrolling
//! through the page in overlapping tiles and stitching them together.
//!
//! # Pipeline
//!
//! - **Readiness**: disable motion, force lazy content to load, pause video,
//!   wait (bounded, non-fatal) for fonts and images
//! - **Height**: measure the document after normalization
//! - **Scheduler**: scroll/settle/capture tiles top to bottom, finishing at the true bottom
//! - **Stitch**: normalize widths and composite with overlap trim
//! - **Encode**: JPEG or PNG, base64 for transport
//!
//! # Example
//!
//! ```no_run
//! use rfshot::{CaptureRequest, PipelineSettings};
//! use rfshot::simulated::{SimulatedFactory, SimulatedPage};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = SimulatedFactory::new(SimulatedPage::new(4000));
//! let request = CaptureRequest::new("https://example.com")?;
//! let result = rfshot::capture(&factory, &request, &PipelineSettings::default())?;
//! println!("{} is {}px tall", result.final_url, result.total_height_px);
//! # Ok(())
//! # }
//! ```

use serde::Serialize;

pub mod error;
pub use error::{Error, Result};

pub mod encode;
pub mod height;
pub mod pipeline;
pub mod readiness;
pub mod request;
pub mod scheduler;
pub mod session;
pub mod simulated;
pub mod stitch;

// CDP backend (headless Chrome)
#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly capture facade (worker-thread backed)
pub mod async_api;

// HTTP transport
pub mod server;

pub use async_api::CaptureService;
pub use pipeline::{capture, CaptureResult, CaptureStrategy, Deadline, PipelineSettings};
pub use request::{CaptureRequest, ImageFormat};
pub use session::{PageSession, SessionFactory, SessionLease, SessionOptions};
pub use stitch::{CompositeImage, Tile};

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: request::DEFAULT_VIEWPORT_WIDTH,
            height: request::DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

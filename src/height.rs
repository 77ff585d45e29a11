//! Height oracle

use crate::session::PageSession;
use crate::{Error, Result};

/// Total scrollable height of the document in CSS pixels.
pub const SCROLL_HEIGHT_JS: &str =
    "Math.max(document.documentElement ? document.documentElement.scrollHeight || 0 : 0, document.body ? document.body.scrollHeight || 0 : 0)";

/// Measure the document height, rounded to whole pixels.
///
/// A height below one pixel means the page is blank or broken and fails the
/// request with `HeightDetectionFailed`.
pub fn measure(session: &mut dyn PageSession) -> Result<u32> {
    let value = session
        .evaluate(SCROLL_HEIGHT_JS, false)
        .map_err(|e| Error::HeightDetectionFailed(e.to_string()))?;
    let height = value
        .as_f64()
        .ok_or_else(|| Error::HeightDetectionFailed(format!("non-numeric height {}", value)))?;
    if !height.is_finite() || height < 1.0 {
        return Err(Error::HeightDetectionFailed(format!(
            "document reported height {}",
            height
        )));
    }
    Ok(height.round().min(u32::MAX as f64) as u32)
}

//! Readiness normalization
//!
//! Mutates only the presentation state of a navigated page so repeated
//! captures at the same scroll offset are pixel-stable. The injected scripts
//! have no typed return contract; a failing script is logged and skipped.

use crate::pipeline::Deadline;
use crate::session::PageSession;
use crate::{CaptureRequest, Result};
use log::{debug, warn};
use std::time::Duration;

/// Disable animations, transitions, fixed backgrounds and smooth scrolling.
pub const DISABLE_MOTION_JS: &str = r#"(function() {
    try {
        var style = document.createElement('style');
        style.setAttribute('data-rfshot', 'motion');
        style.textContent =
            '*, *::before, *::after { animation: none !important; transition: none !important; }' +
            'html, body, * { background-attachment: initial !important; background-position: 0 0 !important; scroll-behavior: auto !important; }';
        (document.head || document.documentElement).appendChild(style);
    } catch (e) {}
})()"#;

/// Copy deferred-source attributes into active ones and drop native lazy hints.
pub const FORCE_EAGER_LOADING_JS: &str = r#"(function() {
    try {
        document.querySelectorAll('img[loading], iframe[loading]').forEach(function(el) { el.loading = 'eager'; });
        document.querySelectorAll('img[decoding]').forEach(function(img) { img.decoding = 'sync'; });
        document.querySelectorAll('img[data-src]').forEach(function(img) {
            if (!img.getAttribute('src')) img.src = img.getAttribute('data-src');
        });
        document.querySelectorAll('img[data-srcset]').forEach(function(img) {
            if (!img.getAttribute('srcset')) img.srcset = img.getAttribute('data-srcset');
        });
        document.querySelectorAll('source[data-srcset]').forEach(function(s) {
            if (!s.getAttribute('srcset')) s.srcset = s.getAttribute('data-srcset');
        });
        document.querySelectorAll('iframe[data-src]').forEach(function(f) {
            if (!f.getAttribute('src')) f.src = f.getAttribute('data-src');
        });
        document.querySelectorAll('video[data-poster]').forEach(function(v) {
            if (!v.getAttribute('poster')) v.poster = v.getAttribute('data-poster');
        });
    } catch (e) {}
})()"#;

/// Pause auto-playing video so frames don't change between tiles.
pub const PAUSE_MEDIA_JS: &str = r#"(function() {
    try {
        document.querySelectorAll('video').forEach(function(v) {
            try { v.preload = 'metadata'; v.autoplay = false; v.pause(); } catch (e) {}
        });
    } catch (e) {}
})()"#;

/// Build the bounded asset wait. The promise rejects with `assets-timeout`
/// when `timeout` elapses before fonts and images are ready.
pub fn asset_wait_script(timeout: Duration) -> String {
    format!(
        r#"(async function(timeout) {{
    const abort = new Promise(function(_, reject) {{
        setTimeout(function() {{ reject(new Error('assets-timeout')); }}, timeout);
    }});
    const fontsReady = (typeof document.fonts !== 'undefined')
        ? document.fonts.ready.catch(function() {{}})
        : Promise.resolve();
    const images = Array.from(document.images || []);
    const imagesReady = Promise.all(images.map(function(img) {{
        if (img.complete) return Promise.resolve();
        if (img.decode) return img.decode().catch(function() {{}});
        return new Promise(function(resolve) {{
            img.addEventListener('load', resolve, {{ once: true }});
            img.addEventListener('error', resolve, {{ once: true }});
        }});
    }}));
    await Promise.race([Promise.all([fontsReady, imagesReady]), abort]);
    return true;
}})({})"#,
        timeout.as_millis()
    )
}

/// Run a presentation script; failures are advisory.
fn inject(session: &mut dyn PageSession, name: &str, script: &str) {
    match session.evaluate(script, false) {
        Ok(_) => debug!("Applied readiness step '{}'", name),
        Err(e) => warn!("Readiness step '{}' failed (continuing): {}", name, e),
    }
}

/// Normalize a navigated page for capture.
///
/// Only deadline expiry is fatal here; an asset wait that runs out of its
/// sub-budget lets the capture proceed with whatever has loaded.
pub fn normalize(
    session: &mut dyn PageSession,
    request: &CaptureRequest,
    asset_settle: Duration,
    deadline: &Deadline,
) -> Result<()> {
    for (name, script) in [
        ("disable-motion", DISABLE_MOTION_JS),
        ("force-eager-loading", FORCE_EAGER_LOADING_JS),
        ("pause-media", PAUSE_MEDIA_JS),
    ] {
        deadline.arm(session)?;
        inject(session, name, script);
    }

    deadline.sleep(asset_settle)?;

    let budget = request.asset_wait_timeout().min(deadline.remaining());
    if budget.is_zero() {
        return deadline.check();
    }
    deadline.arm(session)?;
    match session.wait_for_assets(budget) {
        Ok(()) => debug!("Assets ready within {}ms", budget.as_millis()),
        Err(e) => warn!(
            "Asset readiness wait gave up after {}ms, capturing best-effort content: {}",
            budget.as_millis(),
            e
        ),
    }
    deadline.check()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionFactory, SessionOptions};
    use crate::simulated::{SimulatedFactory, SimulatedPage};
    use crate::Viewport;

    fn run(page: SimulatedPage) -> (Result<()>, crate::simulated::SessionLog) {
        let factory = SimulatedFactory::new(page);
        let mut session = factory
            .open(SessionOptions {
                viewport: Viewport { width: 16, height: 16 },
                block_media: false,
            })
            .unwrap();
        let request = CaptureRequest::new("https://example.com").unwrap();
        let deadline = Deadline::start(request.timeout);
        let res = normalize(session.as_mut(), &request, Duration::ZERO, &deadline);
        (res, factory.last_log().unwrap())
    }

    #[test]
    fn runs_every_step() {
        let (res, log) = run(SimulatedPage::new(100));
        assert!(res.is_ok());
        assert_eq!(log.scripts, 3);
        assert_eq!(log.asset_waits, vec![Duration::from_millis(7_500)]);
    }

    #[test]
    fn asset_timeout_is_not_fatal() {
        let mut page = SimulatedPage::new(100);
        page.asset_wait_times_out = true;
        let (res, log) = run(page);
        assert!(res.is_ok());
        assert_eq!(log.asset_waits.len(), 1);
    }

    #[test]
    fn script_failures_are_advisory() {
        let mut page = SimulatedPage::new(100);
        page.scripts_fail = true;
        let (res, log) = run(page);
        assert!(res.is_ok());
        assert_eq!(log.scripts, 3);
    }

    #[test]
    fn asset_wait_script_embeds_timeout() {
        let js = asset_wait_script(Duration::from_millis(2500));
        assert!(js.trim_end().ends_with("(2500)"));
        assert!(js.contains("assets-timeout"));
    }
}

//! Scroll-capture scheduling
//!
//! Walks the document top to bottom in steps of `viewport - overlap`,
//! capturing one viewport tile per offset, then finishes with one tile taken
//! after scrolling to the document's true bottom.

use crate::pipeline::Deadline;
use crate::session::PageSession;
use crate::stitch::Tile;
use crate::{CaptureRequest, Result};
use log::debug;

/// Default lower bound for the scroll step before the 3/4-viewport fallback.
pub const DEFAULT_MIN_STEP_PX: u32 = 50;

/// Distance between consecutive regular tiles.
///
/// Falls back to three quarters of the viewport when the overlap leaves less
/// than `min_step_px` of forward progress.
pub fn scroll_step(viewport_height: u32, overlap_px: u32, min_step_px: u32) -> u32 {
    let step = viewport_height as i64 - overlap_px as i64;
    if step < min_step_px as i64 {
        ((viewport_height as f64 * 0.75) as u32).max(1)
    } else {
        step as u32
    }
}

/// Offsets of the regular tiles. When the page is taller than the viewport a
/// forced bottom tile follows them.
pub fn planned_offsets(total_height: u32, viewport_height: u32, step: u32) -> Vec<u32> {
    if total_height <= viewport_height {
        return vec![0];
    }
    let step = step.max(1) as u64;
    let mut offsets = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        offsets.push(cursor as u32);
        cursor += step;
        if cursor + viewport_height as u64 >= total_height as u64 {
            break;
        }
    }
    offsets
}

/// Total number of tiles captured for a page, including the bottom tile.
pub fn tile_count(total_height: u32, viewport_height: u32, step: u32) -> usize {
    let regular = planned_offsets(total_height, viewport_height, step).len();
    if total_height <= viewport_height {
        regular
    } else {
        regular + 1
    }
}

fn capture_tile(session: &mut dyn PageSession, offset: u32, deadline: &Deadline) -> Result<Tile> {
    deadline.arm(session)?;
    let png = session
        .capture_viewport()
        .map_err(|e| deadline.classify(e.into_capture_failure("viewport capture")))?;
    let tile = Tile::decode(&png, offset)?;
    debug!(
        "Captured tile at offset {} ({}x{})",
        offset,
        tile.width(),
        tile.height()
    );
    Ok(tile)
}

/// Capture the ordered tile sequence covering `[0, total_height]`.
///
/// Any scroll or capture failure aborts the whole sequence.
pub fn capture_tiles(
    session: &mut dyn PageSession,
    request: &CaptureRequest,
    total_height: u32,
    min_step_px: u32,
    deadline: &Deadline,
) -> Result<Vec<Tile>> {
    let viewport_height = request.viewport.height;
    let settle = request.settle_delay;

    deadline.arm(session)?;
    session
        .scroll_to(0)
        .map_err(|e| deadline.classify(e.into_capture_failure("scroll reset")))?;
    deadline.sleep(settle)?;

    if total_height <= viewport_height {
        return Ok(vec![capture_tile(session, 0, deadline)?]);
    }

    let step = scroll_step(viewport_height, request.overlap_px, min_step_px);
    let offsets = planned_offsets(total_height, viewport_height, step);
    debug!(
        "Scheduling {} tiles for {}px page (viewport {}px, step {}px)",
        offsets.len() + 1,
        total_height,
        viewport_height,
        step
    );

    let mut tiles = Vec::with_capacity(offsets.len() + 1);
    for offset in offsets {
        deadline.arm(session)?;
        session
            .scroll_to(offset)
            .map_err(|e| deadline.classify(e.into_capture_failure("scroll")))?;
        deadline.sleep(settle)?;
        tiles.push(capture_tile(session, offset, deadline)?);
    }

    // The true bottom absorbs rounding and any late height growth.
    deadline.arm(session)?;
    let bottom = session
        .scroll_to_bottom()
        .map_err(|e| deadline.classify(e.into_capture_failure("scroll to bottom")))?;
    deadline.sleep(settle)?;
    tiles.push(capture_tile(session, bottom, deadline)?);

    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionFactory, SessionOptions};
    use crate::simulated::{SessionLog, SimulatedFactory, SimulatedPage};
    use crate::{Error, Viewport};
    use std::time::Duration;

    fn request(viewport_height: u32, overlap_px: u32) -> CaptureRequest {
        let mut req = CaptureRequest::new("https://example.com").unwrap();
        req.viewport = Viewport {
            width: 8,
            height: viewport_height,
        };
        req.overlap_px = overlap_px;
        req.settle_delay = Duration::ZERO;
        req
    }

    fn run(page: SimulatedPage, req: &CaptureRequest) -> (Result<Vec<Tile>>, SessionLog) {
        let total = page.height;
        let factory = SimulatedFactory::new(page);
        let mut session = factory
            .open(SessionOptions {
                viewport: req.viewport,
                block_media: false,
            })
            .unwrap();
        let deadline = Deadline::start(req.timeout);
        let res = capture_tiles(session.as_mut(), req, total, DEFAULT_MIN_STEP_PX, &deadline);
        (res, factory.last_log().unwrap())
    }

    #[test]
    fn step_falls_back_for_pathological_overlap() {
        assert_eq!(scroll_step(1000, 200, 50), 800);
        assert_eq!(scroll_step(1000, 960, 50), 750);
        assert_eq!(scroll_step(1000, 1200, 50), 750);
        assert_eq!(scroll_step(1, 5, 50), 1);
    }

    #[test]
    fn scenario_tall_page_offsets() {
        // 3000px page, 1000px viewport, 200px overlap
        assert_eq!(planned_offsets(3000, 1000, 800), vec![0, 800, 1600]);
        assert_eq!(tile_count(3000, 1000, 800), 4);

        let (tiles, log) = run(SimulatedPage::new(3000), &request(1000, 200));
        let tiles = tiles.unwrap();
        let offsets: Vec<u32> = tiles.iter().map(|t| t.scroll_offset).collect();
        assert_eq!(offsets, vec![0, 800, 1600, 2000]);
        assert_eq!(log.captures, vec![0, 800, 1600, 2000]);
    }

    #[test]
    fn short_page_takes_one_tile() {
        assert_eq!(tile_count(900, 1000, 800), 1);
        assert_eq!(tile_count(1000, 1000, 800), 1);
        let (tiles, log) = run(SimulatedPage::new(900), &request(1000, 200));
        let tiles = tiles.unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].height(), 1000);
        assert_eq!(log.captures, vec![0]);
    }

    #[test]
    fn tile_count_is_deterministic() {
        for (total, vh, step) in [(1001u32, 1000u32, 800u32), (2600, 1000, 800), (10_000, 768, 628), (5000, 1000, 750)] {
            let expected = ((total - vh) as f64 / step as f64).ceil() as usize + 1;
            assert_eq!(tile_count(total, vh, step), expected, "{} {} {}", total, vh, step);
        }
    }

    #[test]
    fn tiles_cover_the_whole_page() {
        for (total, vh, overlap) in [(3000u32, 1000u32, 200u32), (2601, 1000, 140), (12_345, 700, 90), (1500, 1000, 990)] {
            let (tiles, _) = run(SimulatedPage::new(total), &request(vh, overlap));
            let tiles = tiles.unwrap();
            let mut covered_to = 0u32;
            let mut last = None;
            for t in &tiles {
                assert!(t.scroll_offset <= covered_to, "gap before offset {}", t.scroll_offset);
                if let Some(prev) = last {
                    assert!(t.scroll_offset >= prev, "tiles out of order");
                }
                last = Some(t.scroll_offset);
                covered_to = covered_to.max(t.scroll_offset + t.height());
            }
            assert!(covered_to >= total);
        }
    }

    #[test]
    fn capture_error_aborts_sequence() {
        let mut page = SimulatedPage::new(5000);
        page.fail_capture_at = Some(2);
        let (res, log) = run(page, &request(1000, 200));
        assert!(matches!(res, Err(Error::CaptureFailed(_))));
        assert_eq!(log.captures.len(), 2);
    }
}

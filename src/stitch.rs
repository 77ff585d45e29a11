//! Tile stitching
//!
//! Tiles arrive in capture order, which is top-to-bottom document order, and
//! are never re-sorted. Each tile after the first is pasted `overlap_px` above
//! the bottom edge of its predecessor, on top of it.

use crate::{Error, Result};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Background for any canvas pixel no tile covers.
pub const CANVAS_FILL: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);

/// One raster capture of the viewport at a fixed scroll offset.
#[derive(Debug, Clone)]
pub struct Tile {
    pub image: RgbaImage,
    /// Document offset the viewport was scrolled to when captured
    pub scroll_offset: u32,
}

impl Tile {
    /// Decode a PNG capture taken at `scroll_offset`.
    pub fn decode(png: &[u8], scroll_offset: u32) -> Result<Self> {
        let image = image::load_from_memory_with_format(png, image::ImageFormat::Png)
            .map_err(|e| {
                Error::CaptureFailed(format!("undecodable tile at offset {}: {}", scroll_offset, e))
            })?
            .to_rgba8();
        Ok(Self {
            image,
            scroll_offset,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// The stitched result. Built once, then only encoded.
#[derive(Debug, Clone)]
pub struct CompositeImage {
    image: RgbaImage,
}

impl CompositeImage {
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }
}

/// Canvas height for tiles of the given heights: the first tile in full,
/// every later one minus the overlap (never below zero).
pub fn composite_height(heights: &[u32], overlap_px: u32) -> u32 {
    match heights.split_first() {
        Some((first, rest)) => rest
            .iter()
            .fold(*first, |acc, h| acc.saturating_add(h.saturating_sub(overlap_px))),
        None => 0,
    }
}

/// Combine an ordered, non-empty tile sequence into one composite.
///
/// Wider tiles are resized down to the narrowest tile's width so scrollbar
/// drift between captures doesn't leave ragged edges. The seam at a forced
/// bottom tile still subtracts the full `overlap_px` even when that tile
/// overlapped its predecessor by more, which can duplicate a band of rows.
pub fn stitch(tiles: Vec<Tile>, overlap_px: u32) -> Result<CompositeImage> {
    let target_width = tiles
        .iter()
        .map(Tile::width)
        .min()
        .ok_or_else(|| Error::Other("stitch called with an empty tile sequence".into()))?;

    let images: Vec<RgbaImage> = tiles
        .into_iter()
        .map(|tile| {
            if tile.width() > target_width {
                let height = tile.height();
                imageops::resize(&tile.image, target_width, height, FilterType::Triangle)
            } else {
                tile.image
            }
        })
        .collect();

    let heights: Vec<u32> = images.iter().map(RgbaImage::height).collect();
    let final_height = composite_height(&heights, overlap_px);

    let mut canvas = RgbaImage::from_pixel(target_width, final_height, CANVAS_FILL);
    let mut cursor_y: i64 = 0;
    for (i, img) in images.iter().enumerate() {
        let paste_y = if i == 0 {
            0
        } else {
            cursor_y - overlap_px as i64
        };
        imageops::replace(&mut canvas, img, 0, paste_y);
        cursor_y = paste_y + img.height() as i64;
    }

    log::debug!(
        "Stitched {} tiles into {}x{} (overlap {}px)",
        images.len(),
        target_width,
        final_height,
        overlap_px
    );
    Ok(CompositeImage::from_image(canvas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    /// Tile cut from a virtual document where row `y` has color `(y, y >> 8, 7)`.
    fn doc_tile(width: u32, top: u32, height: u32) -> Tile {
        let image = RgbaImage::from_fn(width, height, |_, row| {
            let y = top + row;
            Rgba([(y % 256) as u8, ((y / 256) % 256) as u8, 7, 255])
        });
        Tile {
            image,
            scroll_offset: top,
        }
    }

    fn solid_tile(width: u32, height: u32, shade: u8) -> Tile {
        Tile {
            image: RgbaImage::from_pixel(width, height, Rgba([shade, shade, shade, 255])),
            scroll_offset: 0,
        }
    }

    #[test]
    fn width_is_normalized_to_narrowest_tile() {
        let tiles = vec![solid_tile(800, 40, 10), solid_tile(802, 40, 20), solid_tile(800, 40, 30)];
        let out = stitch(tiles, 10).unwrap();
        assert_eq!(out.width(), 800);
        assert_eq!(out.height(), 40 + 30 + 30);
    }

    #[test]
    fn single_tile_passes_through() {
        let tile = doc_tile(32, 0, 90);
        let expected = tile.image.clone();
        let out = stitch(vec![tile], 140).unwrap();
        assert_eq!(out.height(), 90);
        assert_eq!(out.as_rgba(), &expected);
    }

    #[test]
    fn exact_overlap_reconstructs_document() {
        // viewport 100, overlap 20 => offsets 0, 80, 160 cover a 260px document
        let tiles = vec![doc_tile(4, 0, 100), doc_tile(4, 80, 100), doc_tile(4, 160, 100)];
        let out = stitch(tiles, 20).unwrap();
        assert_eq!(out.height(), 260);
        let expected = doc_tile(4, 0, 260).image;
        assert_eq!(out.as_rgba(), &expected);
    }

    #[test]
    fn later_tiles_win_the_overlap_band() {
        let out = stitch(vec![solid_tile(2, 10, 0), solid_tile(2, 10, 200)], 4).unwrap();
        assert_eq!(out.height(), 16);
        assert_eq!(out.as_rgba().get_pixel(0, 5)[0], 0);
        assert_eq!(out.as_rgba().get_pixel(0, 6)[0], 200);
        assert_eq!(out.as_rgba().get_pixel(1, 15)[0], 200);
    }

    #[test]
    fn overlap_larger_than_tile_never_inflates() {
        let heights = [50, 30, 30];
        assert_eq!(composite_height(&heights, 40), 50);
        let tiles = heights.iter().map(|h| solid_tile(3, *h, 1)).collect();
        let out = stitch(tiles, 40).unwrap();
        assert_eq!(out.height(), 50);
    }

    #[test]
    fn height_stays_within_bounds() {
        // viewport-sized tiles all share one height
        for overlap in [0u32, 1, 17, 140, 999, 1000, 5000] {
            for count in 1..6usize {
                let heights = vec![1000u32; count];
                let h = composite_height(&heights, overlap);
                assert!(h >= 1000, "{} tiles, overlap {}", count, overlap);
                assert!(h <= 1000 * count as u32, "{} tiles, overlap {}", count, overlap);
            }
        }
        let ragged = [7u32, 300, 1, 64, 900];
        for overlap in [0u32, 5, 64, 5000] {
            let h = composite_height(&ragged, overlap);
            assert!(h >= ragged[0] && h <= ragged.iter().sum::<u32>());
        }
    }

    #[test]
    fn stitching_is_deterministic() {
        let make = || vec![doc_tile(64, 0, 120), doc_tile(66, 100, 120), doc_tile(64, 150, 120)];
        let a = stitch(make(), 20).unwrap();
        let b = stitch(make(), 20).unwrap();
        let digest = |c: &CompositeImage| hex::encode(Sha256::digest(c.as_rgba().as_raw()));
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn empty_sequence_fails_fast() {
        assert!(stitch(Vec::new(), 10).is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Tile::decode(b"definitely not a png", 800).unwrap_err();
        assert!(matches!(err, Error::CaptureFailed(_)));
    }
}

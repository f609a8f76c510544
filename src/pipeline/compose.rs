//! Watermark stage: stamps a channel's tile grid onto every page.
//!
//! The rotated tile depends only on the page's pixel width and its
//! pixel/point ratio, so it is rendered once per distinct page geometry and
//! reused for the rest of the document.

use crate::channel::WatermarkSpec;
use crate::error::DistributorError;
use crate::page::{PageImage, WatermarkedPage};
use crate::watermark::{Compositor, Dimensions, TileSource};
use image::RgbaImage;
use std::collections::HashMap;
use tracing::debug;

/// Watermark one page.
pub fn watermark_page(
    page: &PageImage,
    spec: &WatermarkSpec,
    source: &TileSource,
) -> Result<WatermarkedPage, DistributorError> {
    spec.validate()?;
    let tile = source.render(spec, page.width(), page.pixels_per_point())?;
    Ok(stamp(page, spec, &tile))
}

/// Watermark every page, preserving order.
pub fn watermark_pages(
    pages: &[PageImage],
    spec: &WatermarkSpec,
    source: &TileSource,
) -> Result<Vec<WatermarkedPage>, DistributorError> {
    spec.validate()?;

    let mut tiles: HashMap<(u32, u32), RgbaImage> = HashMap::new();
    let mut out = Vec::with_capacity(pages.len());

    for page in pages {
        let ppp = page.pixels_per_point();
        let key = (page.width(), ppp.to_bits());
        if !tiles.contains_key(&key) {
            let tile = source.render(spec, page.width(), ppp)?;
            debug!(
                "{}: rendered {}x{} tile for {} px wide pages",
                spec.channel,
                tile.width(),
                tile.height(),
                page.width()
            );
            tiles.insert(key, tile);
        }
        out.push(stamp(page, spec, &tiles[&key]));
    }

    Ok(out)
}

fn stamp(page: &PageImage, spec: &WatermarkSpec, tile: &RgbaImage) -> WatermarkedPage {
    let spacing = (spec.tile_spacing_pt * page.pixels_per_point()).round().max(0.0) as u32;
    let canvas = Dimensions::new(page.width(), page.height());

    let mut compositor = Compositor::new();
    compositor.add_tiled(tile, canvas, spacing, spec.opacity);

    let mut pixels = page.pixels().clone();
    compositor.apply(&mut pixels);
    debug!(
        "{}: page {} stamped with {} tiles",
        spec.channel,
        page.index() + 1,
        compositor.layer_count()
    );

    WatermarkedPage::from_composited(PageImage::new(
        page.index(),
        page.width_pt(),
        page.height_pt(),
        pixels,
    ))
}

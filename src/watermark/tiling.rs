//! Tile placement on a page canvas.
//!
//! Positions form a regular grid anchored so that one tile sits exactly in
//! the middle of the canvas. The grid then extends in every direction until
//! it leaves the canvas, so tiles that straddle an edge are kept (and later
//! clipped by the compositor) rather than dropped. That leaves the margins
//! no emptier than the gaps between tiles.

/// Pixel size of a canvas or tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Top-left corner of a tile. May be negative or beyond the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlacementPosition {
    pub x: i32,
    pub y: i32,
}

/// Grid positions of `tile` across `canvas` with `spacing` pixels between
/// neighbouring tiles. Row-major, top to bottom, left to right.
pub fn grid_positions(canvas: Dimensions, tile: Dimensions, spacing: u32) -> Vec<PlacementPosition> {
    if canvas.width == 0 || canvas.height == 0 || tile.width == 0 || tile.height == 0 {
        return Vec::new();
    }

    let xs = axis_offsets(canvas.width, tile.width, spacing);
    let ys = axis_offsets(canvas.height, tile.height, spacing);

    let mut positions = Vec::with_capacity(xs.len() * ys.len());
    for &y in &ys {
        for &x in &xs {
            positions.push(PlacementPosition { x, y });
        }
    }
    positions
}

/// Offsets along one axis of every tile that overlaps `[0, extent)`.
fn axis_offsets(extent: u32, tile: u32, spacing: u32) -> Vec<i32> {
    let extent = extent as i64;
    let tile = tile as i64;
    let step = tile + spacing as i64;
    let anchor = (extent - tile).div_euclid(2);

    // First k with anchor + k*step + tile > 0, last k with anchor + k*step < extent.
    let first = (-tile - anchor).div_euclid(step) + 1;
    let last = (extent - 1 - anchor).div_euclid(step);

    (first..=last).map(|k| (anchor + k * step) as i32).collect()
}

/// Whether a tile at `pos` covers at least one canvas pixel.
pub fn is_visible(pos: PlacementPosition, tile: Dimensions, canvas: Dimensions) -> bool {
    let right = pos.x as i64 + tile.width as i64;
    let bottom = pos.y as i64 + tile.height as i64;
    right > 0 && bottom > 0 && (pos.x as i64) < canvas.width as i64 && (pos.y as i64) < canvas.height as i64
}

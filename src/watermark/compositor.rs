//! Alpha compositing of watermark tiles onto opaque page bitmaps.
//!
//! Pages are opaque RGB, so the Porter-Duff "over" operator reduces to
//! `out = fg·a + bg·(1 − a)` with `a = tile alpha × layer opacity`.
//! Parts of a tile outside the page are clipped.

use super::tiling::{grid_positions, Dimensions, PlacementPosition};
use image::{Rgb, Rgba, RgbImage, RgbaImage};

/// One tile placement.
#[derive(Clone, Copy)]
pub struct WatermarkLayer<'a> {
    pub image: &'a RgbaImage,
    pub position: PlacementPosition,
    /// Multiplied into the tile's own alpha channel (0.0 to 1.0).
    pub opacity: f32,
}

impl std::fmt::Debug for WatermarkLayer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkLayer")
            .field("dimensions", &(self.image.width(), self.image.height()))
            .field("position", &self.position)
            .field("opacity", &self.opacity)
            .finish()
    }
}

/// An ordered stack of layers applied to a page in insertion order.
#[derive(Debug, Default)]
pub struct Compositor<'a> {
    layers: Vec<WatermarkLayer<'a>>,
}

impl<'a> Compositor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, layer: WatermarkLayer<'a>) {
        self.layers.push(layer);
    }

    /// Add one layer per grid position of `tile` over a `canvas`-sized page.
    pub fn add_tiled(&mut self, tile: &'a RgbaImage, canvas: Dimensions, spacing: u32, opacity: f32) {
        let tile_dims = Dimensions::new(tile.width(), tile.height());
        for position in grid_positions(canvas, tile_dims, spacing) {
            self.layers.push(WatermarkLayer {
                image: tile,
                position,
                opacity,
            });
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Blend every layer onto `target`.
    pub fn apply(&self, target: &mut RgbImage) {
        for layer in &self.layers {
            blend_layer(target, layer);
        }
    }
}

fn blend_layer(target: &mut RgbImage, layer: &WatermarkLayer<'_>) {
    let opacity = layer.opacity.clamp(0.0, 1.0);
    if opacity == 0.0 {
        return;
    }

    let (tw, th) = (target.width() as i64, target.height() as i64);
    let (px, py) = (layer.position.x as i64, layer.position.y as i64);

    let x_start = px.max(0);
    let y_start = py.max(0);
    let x_end = (px + layer.image.width() as i64).min(tw);
    let y_end = (py + layer.image.height() as i64).min(th);

    for ty in y_start..y_end {
        for tx in x_start..x_end {
            let fg = layer.image.get_pixel((tx - px) as u32, (ty - py) as u32);
            if fg[3] == 0 {
                continue;
            }
            let bg = target.get_pixel_mut(tx as u32, ty as u32);
            *bg = blend_pixel(*bg, *fg, opacity);
        }
    }
}

/// "Over" a translucent foreground onto an opaque background.
fn blend_pixel(background: Rgb<u8>, foreground: Rgba<u8>, opacity: f32) -> Rgb<u8> {
    let alpha = (foreground[3] as f32 / 255.0) * opacity;
    let mix = |fg: u8, bg: u8| -> u8 {
        (fg as f32 * alpha + bg as f32 * (1.0 - alpha))
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgb([
        mix(foreground[0], background[0]),
        mix(foreground[1], background[1]),
        mix(foreground[2], background[2]),
    ])
}

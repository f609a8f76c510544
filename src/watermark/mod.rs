//! Tiled watermark rendering.
//!
//! A channel's tile (its watermark picture, or its label drawn with
//! `ab_glyph`) is rotated once per page size and stamped on a regular grid
//! that reaches past every page edge. All of it is plain arithmetic on
//! pixel buffers, with no randomness, so the same page and spec always
//! produce the same pixels.
//!
//! ```text
//! TileSource ──render──▶ rotated RGBA tile ──grid_positions──▶ layers ──Compositor──▶ page
//! ```

pub mod compositor;
pub mod text;
pub mod tile;
pub mod tiling;
pub mod transform;

pub use compositor::{Compositor, WatermarkLayer};
pub use text::{load_font, measure_text, render_text, Color, TextRenderOptions};
pub use tile::TileSource;
pub use tiling::{grid_positions, is_visible, Dimensions, PlacementPosition};
pub use transform::{rotate_image, scale_to_width};

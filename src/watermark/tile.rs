//! Building the rotated tile a channel stamps across each page.

use super::text::{render_text, TextRenderOptions};
use super::transform::{rotate_image, scale_to_width};
use crate::channel::{ChannelPlan, WatermarkSpec};
use crate::error::DistributorError;
use ab_glyph::FontArc;
use image::RgbaImage;
use std::path::Path;
use tracing::debug;

/// What a channel's tile is made of.
#[derive(Clone)]
pub enum TileSource {
    /// A decoded watermark picture (uploaded or read from the asset directory).
    Image(RgbaImage),
    /// The channel's label rendered with the given font.
    Text { label: String, font: FontArc },
}

impl std::fmt::Debug for TileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileSource::Image(img) => write!(f, "TileSource::Image({}x{})", img.width(), img.height()),
            TileSource::Text { label, .. } => write!(f, "TileSource::Text({label:?})"),
        }
    }
}

impl TileSource {
    /// Pick the tile for `plan`: uploaded image, then `<asset_dir>/<asset file>`,
    /// then the text label.
    pub fn resolve(plan: &ChannelPlan, asset_dir: &Path, font: &FontArc) -> Result<Self, DistributorError> {
        if let Some(bytes) = &plan.watermark_image {
            debug!("{}: using uploaded watermark image", plan.channel);
            return decode_png(bytes, "uploaded watermark").map(TileSource::Image);
        }

        let asset = asset_dir.join(plan.channel.asset_file());
        if asset.is_file() {
            debug!("{}: using watermark asset {}", plan.channel, asset.display());
            let bytes = std::fs::read(&asset).map_err(|e| {
                DistributorError::Watermark(format!("cannot read {}: {e}", asset.display()))
            })?;
            return decode_png(&bytes, &asset.display().to_string()).map(TileSource::Image);
        }

        Ok(TileSource::Text {
            label: plan.spec.label.clone(),
            font: font.clone(),
        })
    }

    /// The rotated tile for a page rendered at `pixels_per_point`, `page_width` px wide.
    pub fn render(
        &self,
        spec: &WatermarkSpec,
        page_width: u32,
        pixels_per_point: f32,
    ) -> Result<RgbaImage, DistributorError> {
        let upright = match self {
            TileSource::Image(img) => {
                let width = (page_width as f32 * spec.image_width_ratio).round() as u32;
                scale_to_width(img, width)
            }
            TileSource::Text { label, font } => render_text(
                font,
                &TextRenderOptions {
                    text: label.clone(),
                    font_size_px: spec.font_size_pt * pixels_per_point,
                    color: spec.color,
                },
            )?,
        };
        Ok(rotate_image(&upright, spec.rotation_degrees))
    }
}

fn decode_png(bytes: &[u8], what: &str) -> Result<RgbaImage, DistributorError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| DistributorError::Watermark(format!("cannot decode {what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::watermark::load_font;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([200, 0, 0, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn falls_back_to_label_without_assets() {
        let dir = tempfile::tempdir().unwrap();
        let font = load_font(None).unwrap();
        let plan = ChannelPlan::new(Channel::Feishu);
        let source = TileSource::resolve(&plan, dir.path(), &font).unwrap();
        assert!(matches!(source, TileSource::Text { ref label, .. } if label == "FEISHU INTERNAL"));
    }

    #[test]
    fn prefers_asset_file_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("WM.WeCOM.png"), png_bytes(40, 10)).unwrap();
        let font = load_font(None).unwrap();
        let plan = ChannelPlan::new(Channel::Wecom);
        let source = TileSource::resolve(&plan, dir.path(), &font).unwrap();
        assert!(matches!(source, TileSource::Image(ref img) if img.width() == 40));
    }

    #[test]
    fn uploaded_image_overrides_asset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("WM.Red.png"), png_bytes(40, 10)).unwrap();
        let font = load_font(None).unwrap();
        let plan = ChannelPlan::new(Channel::Xiaohongshu).with_watermark_image(png_bytes(12, 6));
        let source = TileSource::resolve(&plan, dir.path(), &font).unwrap();
        assert!(matches!(source, TileSource::Image(ref img) if img.width() == 12));
    }

    #[test]
    fn corrupt_asset_is_a_watermark_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("WM.Feishu.png"), b"not a png").unwrap();
        let font = load_font(None).unwrap();
        let err = TileSource::resolve(&ChannelPlan::new(Channel::Feishu), dir.path(), &font).unwrap_err();
        assert!(matches!(err, DistributorError::Watermark(_)));
    }

    #[test]
    fn image_tile_is_scaled_to_page_fraction() {
        let mut spec = Channel::Feishu.watermark_spec();
        spec.rotation_degrees = 0.0;
        let source = TileSource::Image(RgbaImage::from_pixel(100, 50, Rgba([0, 0, 0, 255])));
        let tile = source.render(&spec, 1000, 2.0).unwrap();
        assert_eq!((tile.width(), tile.height()), (600, 300));
    }
}

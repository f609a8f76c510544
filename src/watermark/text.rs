//! Label rendering for text watermark tiles.
//!
//! Labels are drawn with `ab_glyph` onto a transparent RGBA canvas at full
//! alpha; tile opacity is applied later by the compositor. The embedded
//! DejaVu Sans Mono covers Latin scripts only, so labels in other scripts
//! need a font file configured through `font_path`.

use crate::error::DistributorError;
use ab_glyph::{Font, FontArc, FontRef, GlyphId, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

const EMBEDDED_FONT_DATA: &[u8] = include_bytes!("fonts/DejaVuSansMono.ttf");

/// An RGB watermark colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RGB` or `#RRGGBB`.
    pub fn from_hex(hex: &str) -> Result<Self, DistributorError> {
        let digits = hex
            .strip_prefix('#')
            .ok_or_else(|| DistributorError::InvalidConfig("colour must start with '#'".into()))?;
        let channel = |s: &str| {
            u8::from_str_radix(s, 16)
                .map_err(|_| DistributorError::InvalidConfig(format!("invalid hex colour '{hex}'")))
        };
        match digits.len() {
            3 => Ok(Self::new(
                channel(&digits[0..1])? * 17,
                channel(&digits[1..2])? * 17,
                channel(&digits[2..3])? * 17,
            )),
            6 => Ok(Self::new(
                channel(&digits[0..2])?,
                channel(&digits[2..4])?,
                channel(&digits[4..6])?,
            )),
            n => Err(DistributorError::InvalidConfig(format!(
                "colour must be #RGB or #RRGGBB, got {n} digits"
            ))),
        }
    }
}

/// Load the label font: a TTF/OTF file when given, the embedded font otherwise.
pub fn load_font(path: Option<&Path>) -> Result<FontArc, DistributorError> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path).map_err(|e| {
                DistributorError::Watermark(format!("cannot read font {}: {e}", path.display()))
            })?;
            FontArc::try_from_vec(bytes).map_err(|e| {
                DistributorError::Watermark(format!("invalid font {}: {e}", path.display()))
            })
        }
        None => FontRef::try_from_slice(EMBEDDED_FONT_DATA)
            .map(FontArc::new)
            .map_err(|e| DistributorError::Watermark(format!("embedded font: {e}"))),
    }
}

/// Options for rendering one label.
#[derive(Debug, Clone)]
pub struct TextRenderOptions {
    pub text: String,
    /// Glyph height in pixels.
    pub font_size_px: f32,
    pub color: Color,
}

/// Width and height in pixels of `text` at `font_size_px`, including a 2 px pad.
pub fn measure_text(font: &FontArc, text: &str, font_size_px: f32) -> (u32, u32) {
    let scaled = font.as_scaled(PxScale::from(font_size_px));
    let mut width = 0.0f32;
    let mut prev: Option<GlyphId> = None;
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(p) = prev {
            width += scaled.kern(p, id);
        }
        width += scaled.h_advance(id);
        prev = Some(id);
    }
    (width.ceil() as u32 + 2, scaled.height().ceil() as u32 + 2)
}

/// Render a label onto a tight transparent canvas.
pub fn render_text(font: &FontArc, options: &TextRenderOptions) -> Result<RgbaImage, DistributorError> {
    if options.text.trim().is_empty() {
        return Err(DistributorError::Watermark("watermark label is empty".into()));
    }
    if options.font_size_px < 1.0 {
        return Err(DistributorError::Watermark(format!(
            "font size {:.2}px is too small to render",
            options.font_size_px
        )));
    }

    let scale = PxScale::from(options.font_size_px);
    let scaled = font.as_scaled(scale);
    let (width, height) = measure_text(font, &options.text, options.font_size_px);
    let mut canvas = RgbaImage::new(width.max(1), height.max(1));

    let baseline = 1.0 + scaled.ascent();
    let mut cursor_x = 1.0f32;
    let mut prev: Option<GlyphId> = None;

    for c in options.text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(p) = prev {
            cursor_x += scaled.kern(p, id);
        }
        let glyph = id.with_scale_and_position(scale, ab_glyph::point(cursor_x, baseline));
        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|px, py, coverage| {
                let x = px as i32 + bounds.min.x as i32;
                let y = py as i32 + bounds.min.y as i32;
                if x < 0 || y < 0 || x >= canvas.width() as i32 || y >= canvas.height() as i32 {
                    return;
                }
                let alpha = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
                let existing = canvas.get_pixel_mut(x as u32, y as u32);
                // Overlapping glyph edges keep the stronger coverage.
                if alpha > existing[3] {
                    *existing = Rgba([options.color.r, options.color.g, options.color.b, alpha]);
                }
            });
        }
        cursor_x += scaled.h_advance(id);
        prev = Some(id);
    }

    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn font() -> FontArc {
        load_font(None).unwrap()
    }

    #[test]
    fn hex_colours_parse() {
        assert_eq!(Color::from_hex("#FF0000").unwrap(), Color::new(255, 0, 0));
        assert_eq!(Color::from_hex("#abc").unwrap(), Color::new(170, 187, 204));
        assert!(Color::from_hex("FF0000").is_err());
        assert!(Color::from_hex("#GGGGGG").is_err());
        assert!(Color::from_hex("#FF00").is_err());
    }

    #[test]
    fn rendered_label_has_visible_pixels() {
        let img = render_text(
            &font(),
            &TextRenderOptions {
                text: "FEISHU".into(),
                font_size_px: 32.0,
                color: Color::new(0, 0, 0),
            },
        )
        .unwrap();
        assert!(img.width() > img.height());
        assert!(img.pixels().any(|p| p[3] > 0));
    }

    #[test]
    fn larger_font_measures_larger() {
        let f = font();
        let (w1, h1) = measure_text(&f, "WECOM", 12.0);
        let (w2, h2) = measure_text(&f, "WECOM", 36.0);
        assert!(w2 > w1 && h2 > h1);
    }

    #[test]
    fn empty_label_is_an_error() {
        let err = render_text(
            &font(),
            &TextRenderOptions {
                text: "  ".into(),
                font_size_px: 20.0,
                color: Color::new(0, 0, 0),
            },
        )
        .unwrap_err();
        assert!(matches!(err, DistributorError::Watermark(_)));
    }

    #[test]
    fn missing_font_file_is_reported() {
        let err = load_font(Some(Path::new("/nonexistent/font.ttf"))).unwrap_err();
        assert!(err.to_string().contains("cannot read font"));
    }
}

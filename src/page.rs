//! Page bitmaps as they move through the pipeline.
//!
//! A [`PageImage`] is what the rasterizer produces. A [`WatermarkedPage`] can
//! only be obtained from [`crate::pipeline::compose`], and the reassembler
//! accepts nothing else, so a page cannot reach a PDF without being
//! watermarked exactly once.

use image::RgbImage;
use std::fmt;

/// One rasterized page.
#[derive(Clone, PartialEq)]
pub struct PageImage {
    index: usize,
    width_pt: f32,
    height_pt: f32,
    pixels: RgbImage,
}

impl PageImage {
    /// Wrap a bitmap for page `index` (0-based) whose physical size is
    /// `width_pt` × `height_pt` PDF points.
    pub fn new(index: usize, width_pt: f32, height_pt: f32, pixels: RgbImage) -> Self {
        Self {
            index,
            width_pt,
            height_pt,
            pixels,
        }
    }

    /// 0-based position in the source document.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn width_pt(&self) -> f32 {
        self.width_pt
    }

    pub fn height_pt(&self) -> f32 {
        self.height_pt
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Horizontal pixel density; converts point-based watermark sizes to pixels.
    pub fn pixels_per_point(&self) -> f32 {
        if self.width_pt > 0.0 {
            self.width() as f32 / self.width_pt
        } else {
            1.0
        }
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("index", &self.index)
            .field("pixels", &(self.width(), self.height()))
            .field("points", &(self.width_pt, self.height_pt))
            .finish()
    }
}

/// A page whose watermark has been baked into its pixels.
#[derive(Clone, PartialEq)]
pub struct WatermarkedPage {
    page: PageImage,
}

impl WatermarkedPage {
    pub(crate) fn from_composited(page: PageImage) -> Self {
        Self { page }
    }

    pub fn index(&self) -> usize {
        self.page.index
    }

    pub fn width(&self) -> u32 {
        self.page.width()
    }

    pub fn height(&self) -> u32 {
        self.page.height()
    }

    pub fn width_pt(&self) -> f32 {
        self.page.width_pt
    }

    pub fn height_pt(&self) -> f32 {
        self.page.height_pt
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.page.pixels
    }
}

impl fmt::Debug for WatermarkedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WatermarkedPage").field(&self.page).finish()
    }
}

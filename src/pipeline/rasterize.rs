//! PDF rasterisation: every page of the source rendered to an RGB bitmap.
//!
//! pdfium keeps thread-local state and rendering is CPU-bound, so the whole
//! document is processed inside `tokio::task::spawn_blocking`. The result is
//! all-or-nothing: a page that fails to render fails the document.
//!
//! The render scale is `dpi / 72`, reduced when the longest edge would
//! exceed `max_rendered_pixels`. Aspect ratio is preserved either way.

use super::input::SourceDocument;
use crate::engine::bind_pdfium;
use crate::error::{DistributorError, SourceReadReason};
use crate::page::PageImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Rasterise every page of `source`, in document order.
pub async fn rasterize(
    source: &SourceDocument,
    dpi: u32,
    max_rendered_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<PageImage>, DistributorError> {
    let name = source.name().to_string();
    let bytes = source.shared_bytes();
    let password = password.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        rasterize_blocking(&name, &bytes, dpi, max_rendered_pixels, password.as_deref())
    })
    .await
    .map_err(|e| DistributorError::Internal(format!("Rasterize task panicked: {}", e)))?
}

fn rasterize_blocking(
    name: &str,
    bytes: &[u8],
    dpi: u32,
    max_rendered_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<PageImage>, DistributorError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| DistributorError::source_read(name, classify_load_error(&e, password)))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if total == 0 {
        return Err(DistributorError::source_read(name, SourceReadReason::NoPages));
    }
    info!("'{}' loaded: {} pages", name, total);

    let mut out = Vec::with_capacity(total);
    for idx in 0..total {
        let page_error = |detail: String| {
            DistributorError::source_read(name, SourceReadReason::PageRender { page: idx + 1, detail })
        };

        let page = pages.get(idx as u16).map_err(|e| page_error(e.to_string()))?;
        let width_pt = page.width().value;
        let height_pt = page.height().value;
        let scale = render_scale(width_pt, height_pt, dpi, max_rendered_pixels);

        let config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| page_error(e.to_string()))?;
        let pixels = bitmap.as_image().to_rgb8();

        debug!(
            "Rendered page {} ({:.0}x{:.0} pt) → {}x{} px",
            idx + 1,
            width_pt,
            height_pt,
            pixels.width(),
            pixels.height()
        );
        out.push(PageImage::new(idx, width_pt, height_pt, pixels));
    }

    Ok(out)
}

/// Points-to-pixels factor for a page, honouring the pixel cap.
pub(crate) fn render_scale(width_pt: f32, height_pt: f32, dpi: u32, max_rendered_pixels: u32) -> f32 {
    let scale = dpi as f32 / 72.0;
    let longest = width_pt.max(height_pt);
    if longest <= 0.0 {
        return scale;
    }
    let cap = max_rendered_pixels as f32 / longest;
    scale.min(cap)
}

fn classify_load_error(error: &PdfiumError, password: Option<&str>) -> SourceReadReason {
    match error {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            if password.is_some() {
                SourceReadReason::WrongPassword
            } else {
                SourceReadReason::PasswordRequired
            }
        }
        other => SourceReadReason::Corrupt(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_follows_dpi() {
        // A4 portrait at 150 DPI.
        let s = render_scale(595.0, 842.0, 150, 4000);
        assert!((s - 150.0 / 72.0).abs() < 1e-6);
    }

    #[test]
    fn scale_is_capped_on_oversized_pages() {
        // A0 poster: 2384 x 3370 pt at 180 DPI would be 8425 px tall.
        let s = render_scale(2384.0, 3370.0, 180, 4000);
        assert!((3370.0 * s - 4000.0).abs() < 0.5);
    }

    #[test]
    fn degenerate_page_uses_plain_dpi_scale() {
        assert_eq!(render_scale(0.0, 0.0, 72, 4000), 1.0);
    }

    #[test]
    fn password_errors_are_classified() {
        let err = PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError);
        assert_eq!(classify_load_error(&err, None), SourceReadReason::PasswordRequired);
        assert_eq!(classify_load_error(&err, Some("x")), SourceReadReason::WrongPassword);
        let corrupt = PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FormatError);
        assert!(matches!(classify_load_error(&corrupt, None), SourceReadReason::Corrupt(_)));
    }
}

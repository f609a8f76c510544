//! Reassembly: watermarked bitmaps packed into an image-only PDF.
//!
//! Each page becomes one JPEG (`DCTDecode`) image XObject drawn over the
//! full MediaBox, which keeps the source page's size in points. Only
//! [`WatermarkedPage`]s are accepted, so nothing reaches the output without
//! passing through the compositor.
//!
//! ```text
//! Catalog ─▶ Pages ─┬─▶ Page 1 ─▶ Contents "q w 0 0 h 0 0 cm /Im0 Do Q"
//!                   │            └▶ Resources /XObject /Im0 (JPEG)
//!                   └─▶ Page 2 ...
//! ```
//!
//! Output is deterministic: no timestamps, and the trailer `/ID` is derived
//! from the page images.

use crate::error::DistributorError;
use crate::page::WatermarkedPage;
use image::codecs::jpeg::JpegEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use md5::{Digest, Md5};
use tracing::{debug, info};

const PRODUCER: &str = concat!("pdf-distributor ", env!("CARGO_PKG_VERSION"));

/// Build a PDF with one full-page image per input page, in input order.
pub fn assemble(pages: &[WatermarkedPage], jpeg_quality: u8) -> Result<Vec<u8>, DistributorError> {
    if pages.is_empty() {
        return Err(DistributorError::Assembly("no pages to assemble".into()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    let mut id_hasher = Md5::new();

    for (position, page) in pages.iter().enumerate() {
        let jpeg = encode_jpeg(page, jpeg_quality)?;
        id_hasher.update(&jpeg);
        let jpeg_len = jpeg.len();

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => page.width() as i64,
                "Height" => page.height() as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let (width_pt, height_pt) = page_size_pt(page);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(width_pt),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(height_pt),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_bytes = content
            .encode()
            .map_err(|e| DistributorError::Assembly(format!("page {}: {e}", position + 1)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width_pt),
                Object::Real(height_pt),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        kids.push(page_id.into());

        debug!(
            "Page {} → {}x{} px JPEG ({} bytes) on {:.1}x{:.1} pt",
            position + 1,
            page.width(),
            page.height(),
            jpeg_len,
            width_pt,
            height_pt
        );
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Producer" => Object::string_literal(PRODUCER),
    });

    let file_id = id_hasher.finalize().to_vec();
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(file_id.clone(), StringFormat::Hexadecimal),
            Object::String(file_id, StringFormat::Hexadecimal),
        ]),
    );

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| DistributorError::Assembly(format!("cannot serialize PDF: {e}")))?;

    info!("Reassembled {} pages into {} bytes", count, out.len());
    Ok(out)
}

fn encode_jpeg(page: &WatermarkedPage, quality: u8) -> Result<Vec<u8>, DistributorError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(page.pixels())
        .map_err(|e| DistributorError::Assembly(format!("page {}: JPEG encoding failed: {e}", page.index() + 1)))?;
    Ok(buf)
}

/// Physical page size; pages without a known size fall back to 72 DPI.
fn page_size_pt(page: &WatermarkedPage) -> (f32, f32) {
    if page.width_pt() > 0.0 && page.height_pt() > 0.0 {
        (page.width_pt(), page.height_pt())
    } else {
        (page.width() as f32, page.height() as f32)
    }
}

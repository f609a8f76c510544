//! Stage-level integration tests that need no pdfium library: watermark
//! compositing, reassembly and encryption chained through the public API.

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use lopdf::Document;
use pdf_distributor::pipeline::{assemble::assemble, compose, encrypt::encrypt};
use pdf_distributor::watermark::{load_font, TileSource};
use pdf_distributor::{Channel, DistributorError, PageImage, SourceDocument, SourceReadReason, WatermarkedPage};
use pretty_assertions::assert_eq;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// A flat grey A-series-ish page rendered at 2 px/pt.
fn grey_page(index: usize, shade: u8) -> PageImage {
    PageImage::new(index, 120.0, 170.0, RgbImage::from_pixel(240, 340, Rgb([shade, shade, shade])))
}

fn label(channel: Channel) -> TileSource {
    TileSource::Text {
        label: channel.watermark_spec().label,
        font: load_font(None).expect("embedded font"),
    }
}

/// Pages run through the compositor with an invisible watermark, so their
/// pixels reach the reassembler untouched.
fn passthrough(pages: &[PageImage]) -> Vec<WatermarkedPage> {
    let mut spec = Channel::Feishu.watermark_spec();
    spec.opacity = 0.0;
    compose::watermark_pages(pages, &spec, &label(Channel::Feishu)).unwrap()
}

fn mean_luma(jpeg: &[u8]) -> f64 {
    let img = image::load_from_memory(jpeg).unwrap().to_luma8();
    let sum: u64 = img.pixels().map(|p| p.0[0] as u64).sum();
    sum as f64 / (img.width() * img.height()) as f64
}

// ── Compositor ───────────────────────────────────────────────────────────────

#[test]
fn compositing_is_deterministic() {
    let pages: Vec<_> = (0..3).map(|i| grey_page(i, 250)).collect();
    for channel in Channel::ALL {
        let spec = channel.watermark_spec();
        let a = compose::watermark_pages(&pages, &spec, &label(channel)).unwrap();
        let b = compose::watermark_pages(&pages, &spec, &label(channel)).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!(x.pixels() == y.pixels(), "{channel}: run-to-run difference");
        }
    }
}

#[test]
fn channels_stamp_distinct_watermarks() {
    let page = grey_page(0, 250);
    let feishu = compose::watermark_page(&page, &Channel::Feishu.watermark_spec(), &label(Channel::Feishu)).unwrap();
    let red = compose::watermark_page(
        &page,
        &Channel::Xiaohongshu.watermark_spec(),
        &label(Channel::Xiaohongshu),
    )
    .unwrap();
    assert!(feishu.pixels() != red.pixels());
}

#[test]
fn tiles_larger_than_the_page_are_clipped() {
    // The rotated tile is wider than the page in both directions.
    let tiny = PageImage::new(0, 7.0, 5.0, RgbImage::from_pixel(7, 5, Rgb([255, 255, 255])));
    let picture = TileSource::Image(RgbaImage::from_pixel(64, 64, Rgba([200, 0, 0, 255])));
    let mut spec = Channel::Wecom.watermark_spec();
    spec.opacity = 1.0;
    spec.image_width_ratio = 1.0;

    let out = compose::watermark_page(&tiny, &spec, &picture).unwrap();
    assert_eq!((out.width(), out.height()), (7, 5));
    assert!(out.pixels() != tiny.pixels(), "the tile should cover part of the page");
}

#[test]
fn image_tiles_tint_the_page() {
    let page = grey_page(0, 255);
    let picture = TileSource::Image(RgbaImage::from_pixel(40, 40, Rgba([0, 0, 255, 255])));
    let out = compose::watermark_page(&page, &Channel::Feishu.watermark_spec(), &picture).unwrap();

    let tinted = out.pixels().pixels().filter(|p| p.0[2] > p.0[0]).count();
    assert!(tinted > 0);
}

// ── Reassembly ───────────────────────────────────────────────────────────────

#[test]
fn reassembly_keeps_page_order() {
    let shades = [20u8, 130, 235];
    let pages: Vec<_> = shades.iter().enumerate().map(|(i, &s)| grey_page(i, s)).collect();
    let pdf = assemble(&passthrough(&pages), 90).unwrap();

    let doc = Document::load_mem(&pdf).unwrap();
    let page_ids: Vec<_> = doc.get_pages().into_values().collect();
    assert_eq!(page_ids.len(), 3);

    for (page_id, &shade) in page_ids.iter().zip(&shades) {
        let images = doc.get_page_images(*page_id).unwrap();
        assert_eq!(images.len(), 1);
        let luma = mean_luma(images[0].content);
        assert!((luma - shade as f64).abs() < 8.0, "expected ~{shade}, got {luma}");
    }
}

#[test]
fn reassembly_of_nothing_fails() {
    let err = assemble(&[], 80).unwrap_err();
    assert!(matches!(err, DistributorError::Assembly(_)), "got {err:?}");
}

// ── Encryption ───────────────────────────────────────────────────────────────

#[test]
fn encrypted_artifact_opens_with_its_password() {
    let pages: Vec<_> = (0..3).map(|i| grey_page(i, 200)).collect();
    let watermarked = compose::watermark_pages(&pages, &Channel::Feishu.watermark_spec(), &label(Channel::Feishu)).unwrap();
    let pdf = assemble(&watermarked, 80).unwrap();
    let locked = encrypt(&pdf, "test123", "").unwrap();

    assert!(Document::load_mem(&locked).unwrap().is_encrypted());
    assert!(Document::load_mem_with_password(&locked, "888888").is_err());

    let opened = Document::load_mem_with_password(&locked, "test123").unwrap();
    assert_eq!(opened.get_pages().len(), 3);
}

#[test]
fn empty_password_is_an_encryption_error() {
    let pdf = assemble(&passthrough(&[grey_page(0, 100)]), 80).unwrap();
    let err = encrypt(&pdf, "", "owner").unwrap_err();
    assert!(matches!(err, DistributorError::Encryption(_)), "got {err:?}");
}

// ── Source validation ────────────────────────────────────────────────────────

#[test]
fn non_pdf_sources_are_rejected() {
    let err = SourceDocument::from_bytes("notes.txt", b"hello".to_vec()).unwrap_err();
    match err {
        DistributorError::SourceRead { document, reason } => {
            assert_eq!(document, "notes.txt");
            assert!(matches!(reason, SourceReadReason::NotAPdf { .. }));
        }
        other => panic!("expected SourceRead, got {other:?}"),
    }

    let err = SourceDocument::from_bytes("empty.pdf", Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        DistributorError::SourceRead {
            reason: SourceReadReason::Empty,
            ..
        }
    ));
}

#[test]
fn missing_source_file_is_a_source_read_error() {
    let err = tokio_test::block_on(SourceDocument::open("/definitely/not/here.pdf")).unwrap_err();
    assert!(matches!(
        err,
        DistributorError::SourceRead {
            reason: SourceReadReason::Io(_),
            ..
        }
    ));
}

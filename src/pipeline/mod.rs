//! Pipeline stages for PDF distribution.
//!
//! Each submodule implements exactly one transformation step, so every
//! stage can be tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ rasterize ──▶ compose ──▶ assemble ──▶ encrypt ──▶ upload
//! (bytes)   (pdfium)      (tiles)     (lopdf)      (AES-256)   (drive)
//! ```
//!
//! 1. [`input`]: validate the source bytes
//! 2. [`rasterize`]: render every page once per document; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`compose`]: stamp the channel's watermark grid on each page
//! 4. [`assemble`]: pack the pages into an image-only PDF
//! 5. [`encrypt`]: apply the channel's passwords
//! 6. [`upload`]: push to the drive with retry/backoff; the only stage with
//!    network I/O
//!
//! Steps 3 to 6 run once per channel on that channel's own copy of the pages.

pub mod assemble;
pub mod compose;
pub mod encrypt;
pub mod input;
pub mod rasterize;
pub mod upload;

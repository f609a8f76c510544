//! Locating and binding the pdfium shared library.
//!
//! Lookup order:
//! 1. `PDFIUM_LIB_PATH`, either the library file itself or its directory
//! 2. the working directory (how the deployment ships `libpdfium`)
//! 3. the system library search path
//!
//! Failure is reported as [`DistributorError::PdfiumBindingFailed`] so a
//! missing library surfaces as a normal error rather than a panic inside
//! `Pdfium::default()`.

use crate::error::DistributorError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bind to the first pdfium library found.
pub fn bind_pdfium() -> Result<Pdfium, DistributorError> {
    let mut attempts: Vec<String> = Vec::new();

    for candidate in candidate_paths(std::env::var("PDFIUM_LIB_PATH").ok().as_deref()) {
        match Pdfium::bind_to_library(&candidate) {
            Ok(bindings) => {
                debug!("Bound pdfium from {}", candidate.display());
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => attempts.push(format!("{}: {e}", candidate.display())),
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => {
            debug!("Bound system pdfium library");
            Ok(Pdfium::new(bindings))
        }
        Err(e) => {
            attempts.push(format!("system library: {e}"));
            Err(DistributorError::PdfiumBindingFailed(attempts.join("; ")))
        }
    }
}

/// Whether pdfium can be bound in this process environment.
pub fn pdfium_available() -> bool {
    bind_pdfium().is_ok()
}

fn candidate_paths(env_path: Option<&str>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = env_path.filter(|p| !p.is_empty()) {
        let p = Path::new(p);
        if p.is_dir() {
            paths.push(Pdfium::pdfium_platform_library_name_at_path(p));
        } else {
            paths.push(p.to_path_buf());
        }
    }
    paths.push(Pdfium::pdfium_platform_library_name_at_path("./"));
    paths
}

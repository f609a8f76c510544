//! Source documents: validated PDF bytes owned by one distribution run.
//!
//! pdfium happily tries to parse anything, so the `%PDF` signature is
//! checked up front and a non-PDF upload gets a clear `SourceRead` error
//! instead of a parser message.

use crate::error::{DistributorError, SourceReadReason};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// An immutable source PDF.
///
/// The bytes are reference-counted so the blocking rasterizer thread can
/// hold them without copying.
#[derive(Clone)]
pub struct SourceDocument {
    name: String,
    bytes: Arc<Vec<u8>>,
}

impl SourceDocument {
    /// Wrap in-memory bytes, e.g. an HTTP upload.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, DistributorError> {
        let name = name.into();
        check_magic(&name, &bytes)?;
        debug!("Accepted source '{}' ({} bytes)", name, bytes.len());
        Ok(Self {
            name,
            bytes: Arc::new(bytes),
        })
    }

    /// Read and validate a local file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DistributorError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DistributorError::source_read(&name, SourceReadReason::Io(e.to_string())))?;
        Self::from_bytes(name, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDocument")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

fn check_magic(name: &str, bytes: &[u8]) -> Result<(), DistributorError> {
    if bytes.is_empty() {
        return Err(DistributorError::source_read(name, SourceReadReason::Empty));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        let magic = bytes.iter().take(4).copied().collect();
        return Err(DistributorError::source_read(name, SourceReadReason::NotAPdf { magic }));
    }
    Ok(())
}

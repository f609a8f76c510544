//! Error types for the pdf-distributor library.
//!
//! Two error types match the two ways a distribution can go wrong:
//!
//! * [`DistributorError`] is **fatal** for the operation that returned it.
//!   A `SourceRead` error stops the whole document, because no channel can
//!   run without rasterized pages. Every other variant stops only the stage
//!   (and therefore the channel run) that produced it.
//!
//! * [`ChannelError`] is **non-fatal** at document level. It records which
//!   channel failed and at which stage, and is stored inside
//!   [`crate::output::ChannelReport`] so sibling channels keep running.

use crate::channel::Channel;
use crate::output::ArtifactStage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-distributor library.
#[derive(Debug, Error)]
pub enum DistributorError {
    // ── Source errors ─────────────────────────────────────────────────────
    /// The source PDF could not be read. Reported to the user, never retried.
    #[error("Cannot read source PDF '{document}': {reason}")]
    SourceRead {
        document: String,
        reason: SourceReadReason,
    },

    // ── Per-channel stage errors ──────────────────────────────────────────
    /// The channel's watermark could not be prepared (bad PNG asset, unusable font).
    #[error("Watermark preparation failed: {0}")]
    Watermark(String),

    /// Reassembly of watermarked pages into a PDF failed.
    #[error("PDF reassembly failed: {0}")]
    Assembly(String),

    /// The password was rejected or the document cannot be encrypted.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// The cloud drive session is missing, expired or revoked.
    #[error(
        "Cloud drive session is not authorized: {detail}\n\
Re-authorize with `pdf-distributor auth url` followed by `pdf-distributor auth activate <CODE>`."
    )]
    Auth { detail: String },

    /// A transient upload failure (network, quota, 5xx). Retried with backoff.
    #[error("Upload to '{remote_path}' failed: {detail}")]
    Upload { remote_path: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write an artifact or the token file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or request validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Place libpdfium next to the binary, install it system-wide, or\n\
set PDFIUM_LIB_PATH=/path/to/libpdfium (file or directory).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DistributorError {
    /// Shorthand for a [`DistributorError::SourceRead`].
    pub fn source_read(document: impl Into<String>, reason: SourceReadReason) -> Self {
        Self::SourceRead {
            document: document.into(),
            reason,
        }
    }

    /// Whether retrying the same operation can succeed.
    ///
    /// Only transient upload failures qualify; an auth failure needs a new
    /// token first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upload { .. })
    }

    /// The stage that was being attempted when this error occurred.
    pub fn failed_stage(&self) -> ArtifactStage {
        match self {
            Self::SourceRead { .. } | Self::PdfiumBindingFailed(_) => ArtifactStage::Rasterized,
            Self::Watermark(_) => ArtifactStage::Watermarked,
            Self::Assembly(_) => ArtifactStage::Reassembled,
            Self::Encryption(_) => ArtifactStage::Encrypted,
            _ => ArtifactStage::Uploaded,
        }
    }
}

/// Why a source PDF could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SourceReadReason {
    /// The payload does not start with the `%PDF` signature.
    #[error("not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The payload is empty.
    #[error("file is empty")]
    Empty,

    /// The file does not exist or cannot be opened.
    #[error("cannot open file: {0}")]
    Io(String),

    /// The PDF is encrypted and no password was given.
    #[error("document is encrypted and requires a password")]
    PasswordRequired,

    /// A password was given but pdfium rejected it.
    #[error("wrong password")]
    WrongPassword,

    /// Header, xref or page tree is damaged.
    #[error("corrupt PDF: {0}")]
    Corrupt(String),

    /// The document parsed but a page failed to render.
    #[error("page {page} could not be rasterized: {detail}")]
    PageRender { page: usize, detail: String },

    /// The document has no pages.
    #[error("document has no pages")]
    NoPages,
}

/// A non-fatal error for a single channel run.
///
/// Stored in [`crate::output::ChannelReport`]; the other channels of the
/// same document are unaffected.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelError {
    #[error("{channel}: watermark failed: {detail}")]
    Watermark { channel: Channel, detail: String },

    #[error("{channel}: reassembly failed: {detail}")]
    Assembly { channel: Channel, detail: String },

    #[error("{channel}: encryption failed: {detail}")]
    Encryption { channel: Channel, detail: String },

    /// The drive session must be re-authorized before this channel can upload.
    #[error("{channel}: drive authorization required: {detail}")]
    Auth { channel: Channel, detail: String },

    #[error("{channel}: upload failed after {attempts} attempt(s): {detail}")]
    Upload {
        channel: Channel,
        attempts: u32,
        detail: String,
    },

    /// Writing the artifact to a local directory failed.
    #[error("{channel}: writing artifact failed: {detail}")]
    Output { channel: Channel, detail: String },

    /// The run could not be attempted at all (bad configuration, a broken
    /// stage order or a panicked worker).
    #[error("{channel}: internal error: {detail}")]
    Internal { channel: Channel, detail: String },
}

impl ChannelError {
    /// Classify a fatal stage error as a channel-level failure.
    pub fn from_stage_error(channel: Channel, err: &DistributorError, attempts: u32) -> Self {
        let detail = err.to_string();
        match err {
            DistributorError::Watermark(_) => Self::Watermark { channel, detail },
            DistributorError::Assembly(_) => Self::Assembly { channel, detail },
            DistributorError::Encryption(_) => Self::Encryption { channel, detail },
            DistributorError::Auth { .. } => Self::Auth { channel, detail },
            DistributorError::Upload { .. } => Self::Upload {
                channel,
                attempts,
                detail,
            },
            DistributorError::OutputWriteFailed { .. } => Self::Output { channel, detail },
            DistributorError::SourceRead { .. }
            | DistributorError::InvalidConfig(_)
            | DistributorError::PdfiumBindingFailed(_)
            | DistributorError::Internal(_) => Self::Internal { channel, detail },
        }
    }

    /// The channel this error belongs to.
    pub fn channel(&self) -> Channel {
        match self {
            Self::Watermark { channel, .. }
            | Self::Assembly { channel, .. }
            | Self::Encryption { channel, .. }
            | Self::Auth { channel, .. }
            | Self::Upload { channel, .. }
            | Self::Output { channel, .. }
            | Self::Internal { channel, .. } => *channel,
        }
    }

    /// True when the user must re-authorize the drive.
    pub fn needs_reauthorization(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

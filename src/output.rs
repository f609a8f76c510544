//! Result types: artifacts, per-channel reports and run statistics.

use crate::channel::Channel;
use crate::drive::RemoteFile;
use crate::error::{ChannelError, DistributorError};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// How far an artifact has progressed. Stages only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStage {
    Rasterized,
    Watermarked,
    Reassembled,
    Encrypted,
    Uploaded,
}

impl ArtifactStage {
    /// The only stage that may follow this one.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Rasterized => Some(Self::Watermarked),
            Self::Watermarked => Some(Self::Reassembled),
            Self::Reassembled => Some(Self::Encrypted),
            Self::Encrypted => Some(Self::Uploaded),
            Self::Uploaded => None,
        }
    }

    /// Move to `to`, which must be the immediate successor.
    pub fn advance(&mut self, to: Self) -> Result<(), StageTransitionError> {
        if self.next() == Some(to) {
            *self = to;
            Ok(())
        } else {
            Err(StageTransitionError { from: *self, to })
        }
    }
}

impl fmt::Display for ArtifactStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rasterized => "rasterized",
            Self::Watermarked => "watermarked",
            Self::Reassembled => "reassembled",
            Self::Encrypted => "encrypted",
            Self::Uploaded => "uploaded",
        };
        f.write_str(s)
    }
}

/// An attempted non-linear stage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal artifact transition {from} → {to}")]
pub struct StageTransitionError {
    pub from: ArtifactStage,
    pub to: ArtifactStage,
}

/// An encrypted per-channel PDF ready for upload.
#[derive(Clone, PartialEq)]
pub struct DistributionArtifact {
    pub channel: Channel,
    /// `{FILE_PREFIX}{suffix}_{yymmdd}.pdf`
    pub file_name: String,
    /// Destination folder, e.g. `/apps/PDF_Distributor/Feishu`.
    pub remote_dir: String,
    pub page_count: usize,
    pub bytes: Vec<u8>,
    /// Lowercase hex MD5 of `bytes`.
    pub md5: String,
}

impl DistributionArtifact {
    pub fn new(
        channel: Channel,
        file_name: impl Into<String>,
        remote_dir: impl Into<String>,
        page_count: usize,
        bytes: Vec<u8>,
    ) -> Self {
        let md5 = md5_hex(&bytes);
        Self {
            channel,
            file_name: file_name.into(),
            remote_dir: remote_dir.into(),
            page_count,
            bytes,
            md5,
        }
    }

    /// Full remote path of the artifact.
    pub fn remote_path(&self) -> String {
        format!("{}/{}", self.remote_dir.trim_end_matches('/'), self.file_name)
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl fmt::Debug for DistributionArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionArtifact")
            .field("channel", &self.channel)
            .field("remote_path", &self.remote_path())
            .field("page_count", &self.page_count)
            .field("size", &self.bytes.len())
            .field("md5", &self.md5)
            .finish()
    }
}

/// Lowercase hex MD5 digest, the checksum format the drive API expects.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Write `bytes` to `path` via a sibling temp file and a rename, so readers
/// never see a half-written file. Parent directories are created.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DistributorError> {
    let fail = |source: std::io::Error| DistributorError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)
}

/// Outcome of one channel run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelReport {
    pub channel: Channel,
    /// Last stage completed successfully; `Rasterized` if watermarking
    /// never finished.
    pub stage_reached: ArtifactStage,
    pub artifact_name: String,
    /// Set once the upload is confirmed.
    pub remote: Option<RemoteFile>,
    /// Set when the artifact was written to a local directory instead.
    pub local_path: Option<String>,
    pub error: Option<ChannelError>,
    pub upload_attempts: u32,
    pub duration_ms: u64,
}

impl ChannelReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate timing and counts for one source document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributionStats {
    pub total_channels: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rasterize_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything that happened to one source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionReport {
    pub source: String,
    pub page_count: usize,
    pub channels: Vec<ChannelReport>,
    pub stats: DistributionStats,
}

impl DistributionReport {
    pub fn all_succeeded(&self) -> bool {
        self.channels.iter().all(ChannelReport::is_success)
    }

    /// True if any channel stopped because the drive session needs re-authorization.
    pub fn needs_reauthorization(&self) -> bool {
        self.channels
            .iter()
            .filter_map(|c| c.error.as_ref())
            .any(ChannelError::needs_reauthorization)
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelReport> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

//! Cloud drive abstraction and the Baidu Netdisk implementation.
//!
//! The pipeline only sees [`CloudDrive`]. [`BaiduDrive`] speaks the xpan
//! open API and owns a [`Session`] whose token survives restarts through a
//! [`TokenStore`].

pub mod baidu;
pub mod token;

pub use baidu::{BaiduDrive, BaiduEndpoints};
pub use token::{Session, TokenRecord, TokenStore};

use crate::error::DistributorError;
use crate::output::DistributionArtifact;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Confirmation that a file exists on the drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub size: u64,
    /// Lowercase hex MD5 of the uploaded bytes.
    pub md5: String,
    /// Provider file id, when the provider reports one.
    pub fs_id: Option<u64>,
}

impl RemoteFile {
    /// Final path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A remote folder store the uploader can write to.
///
/// Implementations classify failures: [`DistributorError::Auth`] when the
/// session must be re-authorized, [`DistributorError::Upload`] for anything
/// that may succeed on retry.
#[async_trait]
pub trait CloudDrive: Send + Sync {
    /// Store the artifact at [`DistributionArtifact::remote_path`].
    async fn upload(&self, artifact: &DistributionArtifact) -> Result<RemoteFile, DistributorError>;

    /// Look up `name` inside `dir`.
    async fn find(&self, dir: &str, name: &str) -> Result<Option<RemoteFile>, DistributorError>;

    /// Whether the current session is accepted by the provider.
    async fn check_auth(&self) -> Result<bool, DistributorError>;
}

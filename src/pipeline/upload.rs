//! Upload stage: push an artifact to the drive, retrying transient failures.
//!
//! ## Retry strategy
//!
//! Only [`DistributorError::Upload`] is retried, with exponential backoff
//! `retry_backoff_ms * 2^(attempt-1)`: with 1 s base and 3 retries the wait
//! sequence is 1 s → 2 s → 4 s. An auth failure returns at once; retrying
//! with a rejected token cannot succeed. The existence check made before a
//! `skip_existing` upload follows the same policy.

use crate::drive::{CloudDrive, RemoteFile};
use crate::error::DistributorError;
use crate::output::DistributionArtifact;
use crate::progress::ProgressCallback;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Retry policy for one artifact.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Upload `artifact`, returning the outcome and the number of attempts made.
pub async fn upload_with_retry(
    drive: &dyn CloudDrive,
    artifact: &DistributionArtifact,
    policy: RetryPolicy,
    progress: Option<&ProgressCallback>,
) -> (Result<RemoteFile, DistributorError>, u32) {
    with_retry("upload", artifact, policy, progress, || drive.upload(artifact)).await
}

/// Look for an already uploaded copy of `artifact`, retrying transient
/// listing failures under the same policy as the upload itself.
pub async fn find_existing_with_retry(
    drive: &dyn CloudDrive,
    artifact: &DistributionArtifact,
    policy: RetryPolicy,
    progress: Option<&ProgressCallback>,
) -> (Result<Option<RemoteFile>, DistributorError>, u32) {
    with_retry("listing", artifact, policy, progress, || {
        drive.find(&artifact.remote_dir, &artifact.file_name)
    })
    .await
}

async fn with_retry<T, F, Fut>(
    what: &str,
    artifact: &DistributionArtifact,
    policy: RetryPolicy,
    progress: Option<&ProgressCallback>,
    mut call: F,
) -> (Result<T, DistributorError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DistributorError>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match call().await {
            Ok(value) => {
                debug!("{}: {} done on attempt {}", artifact.channel, what, attempts);
                return (Ok(value), attempts);
            }
            Err(e) if e.is_retryable() && attempts <= policy.max_retries => {
                let backoff = policy.backoff(attempts);
                warn!(
                    "{}: {} attempt {} failed: {}; retry {}/{} after {}ms",
                    artifact.channel,
                    what,
                    attempts,
                    e,
                    attempts,
                    policy.max_retries,
                    backoff.as_millis()
                );
                if let Some(cb) = progress {
                    cb.on_upload_retry(artifact.channel, attempts, backoff.as_millis() as u64);
                }
                sleep(backoff).await;
            }
            Err(e) => return (Err(e), attempts),
        }
    }
}

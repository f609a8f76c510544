//! Progress-callback trait for distribution events.
//!
//! Inject an [`Arc<dyn DistributionProgressCallback>`] via
//! [`crate::config::DistributorConfigBuilder::progress_callback`] to follow a
//! run as it rasterizes the source once and then walks each channel through
//! its stages. The CLI renders these events with `indicatif`; the web server
//! logs them.
//!
//! # Example
//!
//! ```rust
//! use pdf_distributor::{Channel, DistributionProgressCallback, DistributorConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Failures(AtomicUsize);
//!
//! impl DistributionProgressCallback for Failures {
//!     fn on_channel_error(&self, channel: Channel, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{channel} failed: {error}");
//!     }
//! }
//!
//! let config = DistributorConfig::builder()
//!     .progress_callback(Arc::new(Failures(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::channel::Channel;
use crate::output::ArtifactStage;
use std::sync::Arc;

/// Called by the distribution pipeline as it progresses.
///
/// All methods default to no-ops so implementors override only what they
/// need. Implementations must be `Send + Sync`; the web server shares one
/// callback across request tasks.
pub trait DistributionProgressCallback: Send + Sync {
    /// The source was rasterized into `total_pages` pages.
    fn on_rasterized(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// A channel run is starting.
    ///
    /// # Arguments
    /// * `position`: 1-indexed position of this channel in the run
    /// * `total_channels`: number of channels requested
    fn on_channel_start(&self, channel: Channel, position: usize, total_channels: usize) {
        let _ = (channel, position, total_channels);
    }

    /// A channel's artifact reached `stage`.
    fn on_stage(&self, channel: Channel, stage: ArtifactStage) {
        let _ = (channel, stage);
    }

    /// An upload attempt failed and will be retried after `backoff_ms`.
    fn on_upload_retry(&self, channel: Channel, attempt: u32, backoff_ms: u64) {
        let _ = (channel, attempt, backoff_ms);
    }

    /// The channel's artifact is stored at `destination`.
    fn on_channel_complete(&self, channel: Channel, destination: &str) {
        let _ = (channel, destination);
    }

    /// The channel run failed; sibling channels continue.
    fn on_channel_error(&self, channel: Channel, error: &str) {
        let _ = (channel, error);
    }

    /// All requested channels have been attempted.
    fn on_distribution_complete(&self, total_channels: usize, success_count: usize) {
        let _ = (total_channels, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DistributionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DistributorConfig`].
pub type ProgressCallback = Arc<dyn DistributionProgressCallback>;

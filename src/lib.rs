//! # pdf-distributor
//!
//! Hand out one PDF to several platforms, each copy stamped with its own
//! watermark, locked with a password and dropped into that platform's cloud
//! drive folder.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      validate the uploaded bytes (%PDF signature)
//!  ├─ 2. Rasterize  render every page once via pdfium (spawn_blocking)
//!  │
//!  └─ per channel (feishu, wecom, xiaohongshu), one after another:
//!      ├─ 3. Watermark   rotated tile grid, clipped at the page edges
//!      ├─ 4. Reassemble  one JPEG image per page (lopdf)
//!      ├─ 5. Encrypt     AES-256, open + owner password
//!      └─ 6. Upload      Baidu Netdisk, retry/backoff on transient errors
//! ```
//!
//! Flattening every page to an image means the distributed copy carries no
//! extractable text and the watermark cannot be lifted off a layer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_distributor::{
//!     distribute, BaiduDrive, Channel, ChannelPlan, DistributorConfig, DriveCredentials,
//!     Session, SourceDocument, TokenStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DistributorConfig::builder_from_env().build()?;
//!     let session = Arc::new(Session::load(TokenStore::new(&config.token_file)).await);
//!     let drive = BaiduDrive::new(DriveCredentials::from_env()?, session, config.upload_timeout_secs)?;
//!
//!     let source = SourceDocument::open("deck.pdf").await?;
//!     let plans = ChannelPlan::defaults_for(&[Channel::Feishu, Channel::Wecom]);
//!     let report = distribute(&source, &plans, &config, &drive).await?;
//!     for channel in &report.channels {
//!         println!("{}: {:?}", channel.channel, channel.remote.as_ref().map(|r| &r.path));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-distributor` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-distributor = { version = "0.1", default-features = false }
//! ```
//!
//! ## Channels
//!
//! | Channel | Artifact name | Drive folder | Watermark asset |
//! |---------|---------------|--------------|-----------------|
//! | `feishu` | `{FILE_PREFIX}f_{yymmdd}.pdf` | `/apps/{APP_FOLDER}/Feishu` | `WM.Feishu.png` |
//! | `wecom` | `{FILE_PREFIX}w_{yymmdd}.pdf` | `/apps/{APP_FOLDER}/WeCom` | `WM.WeCOM.png` |
//! | `xiaohongshu` | `{FILE_PREFIX}r_{yymmdd}.pdf` | `/apps/{APP_FOLDER}/Red` | `WM.Red.png` |
//!
//! Without a watermark asset the channel's label is drawn instead.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod channel;
pub mod config;
pub mod distribute;
pub mod drive;
pub mod engine;
pub mod error;
pub mod output;
pub mod page;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod watermark;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use channel::{parse_channel_list, Channel, ChannelPlan, WatermarkSpec};
pub use config::{DistributorConfig, DistributorConfigBuilder, DriveCredentials};
pub use distribute::{distribute, distribute_sync, distribute_to_dir};
pub use drive::{BaiduDrive, BaiduEndpoints, CloudDrive, RemoteFile, Session, TokenRecord, TokenStore};
pub use engine::pdfium_available;
pub use error::{ChannelError, DistributorError, SourceReadReason};
pub use output::{ArtifactStage, ChannelReport, DistributionArtifact, DistributionReport, DistributionStats};
pub use page::{PageImage, WatermarkedPage};
pub use pipeline::input::SourceDocument;
pub use progress::{DistributionProgressCallback, NoopProgressCallback, ProgressCallback};

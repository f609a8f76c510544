//! Distribution entry points: one source document, many channels.
//!
//! The source is rasterised once. Each requested channel then runs
//! watermark → reassemble → encrypt → store on its own copy of the pages,
//! strictly one channel after another. A channel failure is recorded in its
//! [`ChannelReport`] and the next channel still runs; only an unreadable
//! source aborts the whole document.

use crate::channel::ChannelPlan;
use crate::config::DistributorConfig;
use crate::drive::{CloudDrive, RemoteFile};
use crate::error::{ChannelError, DistributorError};
use crate::output::{
    write_atomic, ArtifactStage, ChannelReport, DistributionArtifact, DistributionReport, DistributionStats,
};
use crate::page::PageImage;
use crate::pipeline::upload::{find_existing_with_retry, upload_with_retry, RetryPolicy};
use crate::pipeline::{assemble, compose, encrypt, input::SourceDocument, rasterize};
use crate::watermark::{load_font, TileSource};
use ab_glyph::FontArc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Where finished artifacts go.
#[derive(Clone, Copy)]
enum Destination<'a> {
    Drive(&'a dyn CloudDrive),
    Directory(&'a Path),
}

/// Distribute `source` to every channel in `plans` and upload the artifacts.
///
/// # Returns
/// `Ok(DistributionReport)` once every channel has been attempted, even if
/// some failed (check [`DistributionReport::all_succeeded`]).
///
/// # Errors
/// Only fatal errors are returned:
/// - the source cannot be read or rasterised (`SourceRead`)
/// - pdfium cannot be bound
/// - `plans` is empty or the configured font cannot be loaded
pub async fn distribute(
    source: &SourceDocument,
    plans: &[ChannelPlan],
    config: &DistributorConfig,
    drive: &dyn CloudDrive,
) -> Result<DistributionReport, DistributorError> {
    run(source, plans, config, Destination::Drive(drive)).await
}

/// Like [`distribute`], but writes each artifact into `out_dir` instead of
/// uploading it. Files are written atomically (temp file + rename).
pub async fn distribute_to_dir(
    source: &SourceDocument,
    plans: &[ChannelPlan],
    config: &DistributorConfig,
    out_dir: impl AsRef<Path>,
) -> Result<DistributionReport, DistributorError> {
    run(source, plans, config, Destination::Directory(out_dir.as_ref())).await
}

/// Synchronous wrapper around [`distribute`].
///
/// Creates a temporary tokio runtime internally.
pub fn distribute_sync(
    source: &SourceDocument,
    plans: &[ChannelPlan],
    config: &DistributorConfig,
    drive: &dyn CloudDrive,
) -> Result<DistributionReport, DistributorError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DistributorError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(distribute(source, plans, config, drive))
}

async fn run(
    source: &SourceDocument,
    plans: &[ChannelPlan],
    config: &DistributorConfig,
    destination: Destination<'_>,
) -> Result<DistributionReport, DistributorError> {
    let total_start = Instant::now();
    info!("Distributing '{}' to {} channel(s)", source.name(), plans.len());

    // ── Step 1: Validate the request ─────────────────────────────────────
    if plans.is_empty() {
        return Err(DistributorError::InvalidConfig(
            "at least one channel is required".into(),
        ));
    }
    let font = load_font(config.font_path.as_deref())?;

    // ── Step 2: Rasterise once ───────────────────────────────────────────
    let raster_start = Instant::now();
    let pages = Arc::new(
        rasterize::rasterize(
            source,
            config.dpi,
            config.max_rendered_pixels,
            config.source_password.as_deref(),
        )
        .await?,
    );
    let rasterize_duration_ms = raster_start.elapsed().as_millis() as u64;
    info!("Rasterised {} pages in {}ms", pages.len(), rasterize_duration_ms);
    if let Some(ref cb) = config.progress_callback {
        cb.on_rasterized(pages.len());
    }

    // ── Step 3: Run each channel in turn ─────────────────────────────────
    let mut report = run_channels(source.name(), &pages, plans, &font, config, destination).await;
    report.stats.rasterize_duration_ms = rasterize_duration_ms;
    report.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Distribution of '{}' complete: {}/{} channels, {}ms total",
        source.name(),
        report.stats.succeeded,
        report.stats.total_channels,
        report.stats.total_duration_ms
    );
    Ok(report)
}

/// Run every plan over already rasterised pages. Timing fields of the
/// returned stats cover the channel runs only.
async fn run_channels(
    source_name: &str,
    pages: &Arc<Vec<PageImage>>,
    plans: &[ChannelPlan],
    font: &FontArc,
    config: &DistributorConfig,
    destination: Destination<'_>,
) -> DistributionReport {
    let start = Instant::now();
    let mut channels = Vec::with_capacity(plans.len());
    for (position, plan) in plans.iter().enumerate() {
        if let Some(ref cb) = config.progress_callback {
            cb.on_channel_start(plan.channel, position + 1, plans.len());
        }
        let report = run_channel(plan, pages, font, config, destination).await;
        if let Some(ref cb) = config.progress_callback {
            match &report.error {
                None => {
                    let dest = report
                        .remote
                        .as_ref()
                        .map(|r| r.path.clone())
                        .or_else(|| report.local_path.clone())
                        .unwrap_or_default();
                    cb.on_channel_complete(plan.channel, &dest);
                }
                Some(e) => cb.on_channel_error(plan.channel, &e.to_string()),
            }
        }
        channels.push(report);
    }

    let succeeded = channels.iter().filter(|c| c.is_success()).count();
    let stats = DistributionStats {
        total_channels: channels.len(),
        succeeded,
        failed: channels.len() - succeeded,
        rasterize_duration_ms: 0,
        total_duration_ms: start.elapsed().as_millis() as u64,
    };
    if let Some(ref cb) = config.progress_callback {
        cb.on_distribution_complete(stats.total_channels, succeeded);
    }

    DistributionReport {
        source: source_name.to_string(),
        page_count: pages.len(),
        channels,
        stats,
    }
}

/// What a successful channel run stored.
enum Stored {
    Remote(RemoteFile),
    Local(PathBuf),
}

/// Run one channel; never fails, errors are folded into the report.
async fn run_channel(
    plan: &ChannelPlan,
    pages: &Arc<Vec<PageImage>>,
    font: &FontArc,
    config: &DistributorConfig,
    destination: Destination<'_>,
) -> ChannelReport {
    let start = Instant::now();
    let channel = plan.channel;
    let artifact_name = config.artifact_name(channel);
    let mut stage = ArtifactStage::Rasterized;
    let mut attempts = 0;

    let outcome = run_stages(plan, pages, font, config, destination, &artifact_name, &mut stage, &mut attempts).await;

    let mut report = ChannelReport {
        channel,
        stage_reached: stage,
        artifact_name,
        remote: None,
        local_path: None,
        error: None,
        upload_attempts: attempts,
        duration_ms: 0,
    };
    match outcome {
        Ok(Stored::Remote(remote)) => {
            info!("{}: stored at {}", channel, remote.path);
            report.remote = Some(remote);
        }
        Ok(Stored::Local(path)) => {
            info!("{}: written to {}", channel, path.display());
            report.local_path = Some(path.display().to_string());
        }
        Err(e) => {
            error!("{}: failed after reaching '{}': {}", channel, stage, e);
            report.error = Some(ChannelError::from_stage_error(channel, &e, attempts));
        }
    }
    report.duration_ms = start.elapsed().as_millis() as u64;
    report
}

#[allow(clippy::too_many_arguments)]
async fn run_stages(
    plan: &ChannelPlan,
    pages: &Arc<Vec<PageImage>>,
    font: &FontArc,
    config: &DistributorConfig,
    destination: Destination<'_>,
    artifact_name: &str,
    stage: &mut ArtifactStage,
    attempts: &mut u32,
) -> Result<Stored, DistributorError> {
    let channel = plan.channel;

    // Watermark
    let tile = TileSource::resolve(plan, &config.asset_dir, font)?;
    let watermarked = {
        let pages = Arc::clone(pages);
        let spec = plan.spec.clone();
        blocking("watermark", move || {
            compose::watermark_pages(&pages, &spec, &tile).map_err(|e| match e {
                DistributorError::InvalidConfig(msg) => DistributorError::Watermark(msg),
                other => other,
            })
        })
        .await?
    };
    reach(stage, ArtifactStage::Watermarked, plan, config)?;

    // Reassemble
    let page_count = watermarked.len();
    let quality = config.jpeg_quality;
    let pdf = blocking("reassembly", move || assemble::assemble(&watermarked, quality)).await?;
    reach(stage, ArtifactStage::Reassembled, plan, config)?;

    // Encrypt
    let user = plan.user_password.clone();
    let owner = plan.owner_password.clone();
    let encrypted = blocking("encryption", move || encrypt::encrypt(&pdf, &user, &owner)).await?;
    reach(stage, ArtifactStage::Encrypted, plan, config)?;

    let artifact = DistributionArtifact::new(
        channel,
        artifact_name,
        config.remote_dir(channel),
        page_count,
        encrypted,
    );
    debug!("{}: artifact ready {:?}", channel, artifact);

    // Store
    match destination {
        Destination::Directory(dir) => {
            let path = dir.join(&artifact.file_name);
            write_atomic(&path, &artifact.bytes).await?;
            Ok(Stored::Local(path))
        }
        Destination::Drive(drive) => {
            let policy = RetryPolicy {
                max_retries: config.max_retries,
                backoff_ms: config.retry_backoff_ms,
            };
            if config.skip_existing {
                let (found, made) =
                    find_existing_with_retry(drive, &artifact, policy, config.progress_callback.as_ref()).await;
                *attempts = made;
                if let Some(existing) = found? {
                    info!("{}: {} already on the drive; skipping upload", channel, existing.path);
                    reach(stage, ArtifactStage::Uploaded, plan, config)?;
                    return Ok(Stored::Remote(existing));
                }
            }
            let (result, made) =
                upload_with_retry(drive, &artifact, policy, config.progress_callback.as_ref()).await;
            *attempts = made;
            let remote = result?;
            reach(stage, ArtifactStage::Uploaded, plan, config)?;
            Ok(Stored::Remote(remote))
        }
    }
}

fn reach(
    stage: &mut ArtifactStage,
    to: ArtifactStage,
    plan: &ChannelPlan,
    config: &DistributorConfig,
) -> Result<(), DistributorError> {
    stage
        .advance(to)
        .map_err(|e| DistributorError::Internal(e.to_string()))?;
    debug!("{}: reached '{}'", plan.channel, to);
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage(plan.channel, to);
    }
    Ok(())
}

/// Run CPU-bound stage work off the async worker threads.
async fn blocking<T, F>(what: &str, work: F) -> Result<T, DistributorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DistributorError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DistributorError::Internal(format!("{} task panicked: {}", what, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::output::md5_hex;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory drive that can reject one folder and fail early listings.
    #[derive(Default)]
    struct TestDrive {
        files: Mutex<HashMap<String, RemoteFile>>,
        rejected_dir: Option<&'static str>,
        failing_listings: AtomicUsize,
        finds: AtomicUsize,
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl CloudDrive for TestDrive {
        async fn upload(&self, artifact: &DistributionArtifact) -> Result<RemoteFile, DistributorError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.rejected_dir.is_some_and(|d| artifact.remote_dir.ends_with(d)) {
                return Err(DistributorError::Auth {
                    detail: "errno 111: access token invalid".into(),
                });
            }
            let remote = RemoteFile {
                path: artifact.remote_path(),
                size: artifact.size(),
                md5: artifact.md5.clone(),
                fs_id: None,
            };
            self.files.lock().unwrap().insert(remote.path.clone(), remote.clone());
            Ok(remote)
        }

        async fn find(&self, dir: &str, name: &str) -> Result<Option<RemoteFile>, DistributorError> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            let path = format!("{dir}/{name}");
            if self.failing_listings.load(Ordering::SeqCst) > 0 {
                self.failing_listings.fetch_sub(1, Ordering::SeqCst);
                return Err(DistributorError::Upload {
                    remote_path: path,
                    detail: "HTTP 503 Service Unavailable".into(),
                });
            }
            Ok(self.files.lock().unwrap().get(&path).cloned())
        }

        async fn check_auth(&self) -> Result<bool, DistributorError> {
            Ok(true)
        }
    }

    fn pages(n: usize) -> Arc<Vec<PageImage>> {
        Arc::new(
            (0..n)
                .map(|i| PageImage::new(i, 120.0, 170.0, RgbImage::from_pixel(240, 340, Rgb([240, 240, 240]))))
                .collect(),
        )
    }

    fn config(assets: &Path) -> DistributorConfig {
        DistributorConfig::builder()
            .date_stamp("250101")
            .asset_dir(assets)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    async fn run_over_pages(
        plans: &[ChannelPlan],
        config: &DistributorConfig,
        drive: &TestDrive,
    ) -> DistributionReport {
        let font = load_font(None).unwrap();
        run_channels("deck.pdf", &pages(2), plans, &font, config, Destination::Drive(drive)).await
    }

    #[tokio::test]
    async fn broken_watermark_fails_only_its_channel() {
        let assets = tempfile::tempdir().unwrap();
        let plans = vec![
            ChannelPlan::new(Channel::Feishu),
            ChannelPlan::new(Channel::Wecom).with_watermark_image(b"not a png".to_vec()),
            ChannelPlan::new(Channel::Xiaohongshu),
        ];
        let drive = TestDrive::default();

        let report = run_over_pages(&plans, &config(assets.path()), &drive).await;

        assert_eq!(report.stats.succeeded, 2);
        assert_eq!(report.stats.failed, 1);
        let order: Vec<_> = report.channels.iter().map(|c| c.channel).collect();
        assert_eq!(order, Channel::ALL.to_vec());

        let wecom = report.channel(Channel::Wecom).unwrap();
        assert!(matches!(wecom.error, Some(ChannelError::Watermark { .. })), "{:?}", wecom.error);
        assert_eq!(wecom.stage_reached, ArtifactStage::Rasterized);
        for ok in [Channel::Feishu, Channel::Xiaohongshu] {
            let c = report.channel(ok).unwrap();
            assert!(c.is_success(), "{ok}: {:?}", c.error);
            assert_eq!(c.stage_reached, ArtifactStage::Uploaded);
        }
        assert_eq!(drive.files.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejected_upload_fails_only_its_channel() {
        let assets = tempfile::tempdir().unwrap();
        let drive = TestDrive {
            rejected_dir: Some("/WeCom"),
            ..TestDrive::default()
        };

        let report = run_over_pages(&ChannelPlan::defaults_for(&Channel::ALL), &config(assets.path()), &drive).await;

        assert_eq!(report.stats.failed, 1);
        assert!(report.needs_reauthorization());
        let wecom = report.channel(Channel::Wecom).unwrap();
        assert_eq!(wecom.stage_reached, ArtifactStage::Encrypted);
        assert_eq!(wecom.upload_attempts, 1);
        assert!(report.channel(Channel::Xiaohongshu).unwrap().is_success());
    }

    #[tokio::test]
    async fn transient_listing_failure_is_retried_before_skipping() {
        let assets = tempfile::tempdir().unwrap();
        let mut config = config(assets.path());
        config.skip_existing = true;
        let path = format!("{}/{}", config.remote_dir(Channel::Feishu), config.artifact_name(Channel::Feishu));
        let drive = TestDrive::default();
        drive.files.lock().unwrap().insert(
            path.clone(),
            RemoteFile {
                path: path.clone(),
                size: 3,
                md5: md5_hex(b"old"),
                fs_id: Some(9),
            },
        );
        drive.failing_listings.store(1, Ordering::SeqCst);

        let report = run_over_pages(&[ChannelPlan::new(Channel::Feishu)], &config, &drive).await;

        let feishu = &report.channels[0];
        assert!(feishu.is_success(), "{:?}", feishu.error);
        assert_eq!(feishu.remote.as_ref().unwrap().path, path);
        assert_eq!(drive.finds.load(Ordering::SeqCst), 2);
        assert_eq!(drive.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn listing_that_keeps_failing_reports_its_attempts() {
        let assets = tempfile::tempdir().unwrap();
        let mut config = config(assets.path());
        config.skip_existing = true;
        config.max_retries = 2;
        let drive = TestDrive::default();
        drive.failing_listings.store(10, Ordering::SeqCst);

        let report = run_over_pages(&[ChannelPlan::new(Channel::Wecom)], &config, &drive).await;

        let wecom = &report.channels[0];
        match &wecom.error {
            Some(ChannelError::Upload { attempts, .. }) => assert_eq!(*attempts, 3),
            other => panic!("expected an upload error, got {other:?}"),
        }
        assert_eq!(wecom.upload_attempts, 3);
        assert_eq!(drive.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_plan_list_is_rejected_before_rasterising() {
        let source = SourceDocument::from_bytes("a.pdf", b"%PDF-1.4".to_vec()).unwrap();
        let config = DistributorConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let err = distribute_to_dir(&source, &[], &config, dir.path()).await.unwrap_err();
        assert!(matches!(err, DistributorError::InvalidConfig(_)));
    }

    #[test]
    fn reach_refuses_to_skip_stages() {
        let plan = ChannelPlan::new(Channel::Feishu);
        let config = DistributorConfig::default();
        let mut stage = ArtifactStage::Rasterized;
        assert!(reach(&mut stage, ArtifactStage::Encrypted, &plan, &config).is_err());
        reach(&mut stage, ArtifactStage::Watermarked, &plan, &config).unwrap();
        assert_eq!(stage, ArtifactStage::Watermarked);
    }

    #[tokio::test]
    async fn blocking_surfaces_stage_errors() {
        let err = blocking::<(), _>("assembly", || Err(DistributorError::Assembly("x".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, DistributorError::Assembly(_)));
    }
}

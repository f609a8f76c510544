//! Configuration types for PDF distribution.
//!
//! Everything a distribution run needs lives in [`DistributorConfig`], built
//! via its [`DistributorConfigBuilder`]. Drive credentials are kept apart in
//! [`DriveCredentials`] because they belong to the long-lived session, not
//! to a single run.

use crate::channel::Channel;
use crate::error::DistributorError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// Default remote folder under `/apps/` when `APP_FOLDER` is unset.
pub const DEFAULT_APP_FOLDER: &str = "PDF_Distributor";
/// Default artifact name prefix when `FILE_PREFIX` is unset.
pub const DEFAULT_FILE_PREFIX: &str = "Dist";
/// Default location of the persisted drive token.
pub const DEFAULT_TOKEN_FILE: &str = "baidu_token.json";

/// Configuration for a distribution run.
///
/// # Example
/// ```rust
/// use pdf_distributor::DistributorConfig;
///
/// let config = DistributorConfig::builder()
///     .dpi(150)
///     .file_prefix("Weekly")
///     .app_folder("Reports")
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 150);
/// ```
#[derive(Clone)]
pub struct DistributorConfig {
    /// Rasterization DPI. Range: 72–400. Default: 180.
    ///
    /// 180 DPI matches a 2.5× zoom of the 72-point PDF grid: small print
    /// stays legible after JPEG compression while a 20-page A4 document
    /// stays in the low megabytes.
    pub dpi: u32,

    /// Longest rendered edge in pixels. Default: 4000.
    ///
    /// Caps memory on oversized pages (posters, drawings) whatever the DPI.
    pub max_rendered_pixels: u32,

    /// JPEG quality of reassembled pages, 1–100. Default: 80.
    pub jpeg_quality: u8,

    /// Folder under `/apps/` on the drive (`APP_FOLDER`).
    pub app_folder: String,

    /// Artifact name prefix (`FILE_PREFIX`).
    pub file_prefix: String,

    /// Directory searched for `WM.*.png` channel watermark assets. Default: `.`.
    pub asset_dir: PathBuf,

    /// TTF/OTF used for text labels. `None` uses the embedded font.
    pub font_path: Option<PathBuf>,

    /// Where the drive token is persisted. Default: `baidu_token.json`.
    pub token_file: PathBuf,

    /// Per-request timeout for drive calls in seconds. Default: 120.
    pub upload_timeout_secs: u64,

    /// Retries after a transient upload failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Password of an encrypted source PDF.
    pub source_password: Option<String>,

    /// Fixed `yymmdd` stamp for artifact names. `None` uses today's local date.
    pub date_stamp: Option<String>,

    /// Skip the upload when the target folder already holds a file of the same name. Default: false.
    pub skip_existing: bool,

    /// Receives progress events during a run.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            dpi: 180,
            max_rendered_pixels: 4000,
            jpeg_quality: 80,
            app_folder: DEFAULT_APP_FOLDER.into(),
            file_prefix: DEFAULT_FILE_PREFIX.into(),
            asset_dir: PathBuf::from("."),
            font_path: None,
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            upload_timeout_secs: 120,
            max_retries: 3,
            retry_backoff_ms: 1000,
            source_password: None,
            date_stamp: None,
            skip_existing: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DistributorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributorConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("app_folder", &self.app_folder)
            .field("file_prefix", &self.file_prefix)
            .field("asset_dir", &self.asset_dir)
            .field("font_path", &self.font_path)
            .field("token_file", &self.token_file)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("source_password", &self.source_password.as_ref().map(|_| "<redacted>"))
            .field("date_stamp", &self.date_stamp)
            .field("skip_existing", &self.skip_existing)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DistributionProgressCallback>"),
            )
            .finish()
    }
}

impl DistributorConfig {
    /// Create a new builder for `DistributorConfig`.
    pub fn builder() -> DistributorConfigBuilder {
        DistributorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder pre-filled from `APP_FOLDER` and `FILE_PREFIX` when they are set.
    pub fn builder_from_env() -> DistributorConfigBuilder {
        let mut builder = Self::builder();
        if let Some(folder) = non_empty_env("APP_FOLDER") {
            builder = builder.app_folder(folder);
        }
        if let Some(prefix) = non_empty_env("FILE_PREFIX") {
            builder = builder.file_prefix(prefix);
        }
        builder
    }

    /// The `yymmdd` stamp used in artifact names.
    pub fn date_stamp(&self) -> String {
        self.date_stamp
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%y%m%d").to_string())
    }

    /// `{FILE_PREFIX}{suffix}_{yymmdd}.pdf`
    pub fn artifact_name(&self, channel: Channel) -> String {
        format!(
            "{}{}_{}.pdf",
            self.file_prefix,
            channel.file_suffix(),
            self.date_stamp()
        )
    }

    /// `/apps/{APP_FOLDER}/{channel folder}`
    pub fn remote_dir(&self, channel: Channel) -> String {
        format!("/apps/{}/{}", self.app_folder, channel.remote_folder())
    }
}

/// Builder for [`DistributorConfig`].
#[derive(Debug)]
pub struct DistributorConfigBuilder {
    config: DistributorConfig,
}

impl DistributorConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn app_folder(mut self, folder: impl Into<String>) -> Self {
        self.config.app_folder = folder.into();
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    pub fn asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.asset_dir = dir.into();
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.font_path = Some(path.into());
        self
    }

    pub fn token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.token_file = path.into();
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn source_password(mut self, pwd: impl Into<String>) -> Self {
        let pwd = pwd.into();
        self.config.source_password = if pwd.is_empty() { None } else { Some(pwd) };
        self
    }

    pub fn date_stamp(mut self, stamp: impl Into<String>) -> Self {
        self.config.date_stamp = Some(stamp.into());
        self
    }

    pub fn skip_existing(mut self, v: bool) -> Self {
        self.config.skip_existing = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DistributorConfig, DistributorError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(DistributorError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        validate_path_segment("APP_FOLDER", &c.app_folder)?;
        validate_path_segment("FILE_PREFIX", &c.file_prefix)?;
        if let Some(stamp) = &c.date_stamp {
            if stamp.is_empty() || stamp.contains(['/', '\\']) {
                return Err(DistributorError::InvalidConfig(format!(
                    "date stamp '{stamp}' cannot be used in a file name"
                )));
            }
        }
        Ok(self.config)
    }
}

/// Baidu open-platform app credentials (`BAIDU_AK` / `BAIDU_SK`).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DriveCredentials {
    pub app_key: String,
    pub secret_key: String,
}

impl DriveCredentials {
    pub fn new(app_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Read `BAIDU_AK` and `BAIDU_SK`; both must be set and non-empty.
    pub fn from_env() -> Result<Self, DistributorError> {
        match (non_empty_env("BAIDU_AK"), non_empty_env("BAIDU_SK")) {
            (Some(ak), Some(sk)) => Ok(Self::new(ak, sk)),
            _ => Err(DistributorError::InvalidConfig(
                "BAIDU_AK and BAIDU_SK must both be set".into(),
            )),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.app_key.is_empty() && !self.secret_key.is_empty()
    }
}

impl fmt::Debug for DriveCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveCredentials")
            .field("app_key", &self.app_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Names that end up inside a remote path must be a single clean segment.
fn validate_path_segment(what: &str, value: &str) -> Result<(), DistributorError> {
    if value.trim().is_empty() {
        return Err(DistributorError::InvalidConfig(format!("{what} must not be empty")));
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(DistributorError::InvalidConfig(format!(
            "{what} '{value}' must be a single path segment"
        )));
    }
    Ok(())
}

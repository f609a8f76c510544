//! CLI binary for pdf-distributor.
//!
//! `serve` runs the web server; `run` distributes one local PDF; `auth`
//! walks through the drive authorization flow. All of them are thin shims
//! over the library crate.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_distributor::config::{DEFAULT_APP_FOLDER, DEFAULT_FILE_PREFIX, DEFAULT_TOKEN_FILE};
use pdf_distributor::server::{self, AppState};
use pdf_distributor::{
    distribute, distribute_to_dir, parse_channel_list, ArtifactStage, BaiduDrive, Channel, ChannelPlan,
    CloudDrive, DistributionProgressCallback, DistributionReport, DistributorConfig, DriveCredentials,
    ProgressCallback, Session, SourceDocument, TokenStore,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER_TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar advancing through the channels, with
/// a log line per finished channel.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Wall-clock start per channel for elapsed reporting.
    start_times: Mutex<HashMap<Channel, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_channel_start` reveals how many channels there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&SPINNER_TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rasterizing PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:30.green/238}] {pos}/{len} channels  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&SPINNER_TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Distributing");
    }

    fn elapsed(&self, channel: Channel) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&channel))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl DistributionProgressCallback for CliProgressCallback {
    fn on_rasterized(&self, total_pages: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rasterized {total_pages} pages"))
        ));
    }

    fn on_channel_start(&self, channel: Channel, position: usize, total_channels: usize) {
        if position == 1 {
            self.activate_bar(total_channels);
        }
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(channel, Instant::now());
        }
        self.bar.set_message(format!("{channel}: watermarking"));
    }

    fn on_stage(&self, channel: Channel, stage: ArtifactStage) {
        let next = match stage {
            ArtifactStage::Watermarked => "reassembling",
            ArtifactStage::Reassembled => "encrypting",
            ArtifactStage::Encrypted => "storing",
            _ => return,
        };
        self.bar.set_message(format!("{channel}: {next}"));
    }

    fn on_upload_retry(&self, channel: Channel, attempt: u32, backoff_ms: u64) {
        self.bar.println(format!(
            "  {} {:<12} upload attempt {} failed, retrying in {}",
            cyan("↻"),
            channel.display_name(),
            attempt,
            dim(&format!("{:.1}s", backoff_ms as f64 / 1000.0)),
        ));
    }

    fn on_channel_complete(&self, channel: Channel, destination: &str) {
        let secs = self.elapsed(channel);
        self.bar.println(format!(
            "  {} {:<12} {}  {}",
            green("✓"),
            channel.display_name(),
            destination,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_channel_error(&self, channel: Channel, error: &str) {
        let secs = self.elapsed(channel);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<12} {}  {}",
            red("✗"),
            channel.display_name(),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_distribution_complete(&self, total_channels: usize, success_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} channels distributed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} channels distributed  ({} failed)",
                if failed == total_channels { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_channels,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Authorize the drive once (token is stored in baidu_token.json)
  pdf-distributor auth url
  pdf-distributor auth activate 4f1c...e9

  # Start the web server
  pdf-distributor serve --host 0.0.0.0 --port 8501

  # Distribute a local PDF to every channel
  pdf-distributor run deck.pdf

  # Two channels, custom open password, write locally instead of uploading
  pdf-distributor run deck.pdf --channels feishu,red --password test123 --out-dir dist/

CHANNELS:
  Channel       File name                   Drive folder
  ───────────   ─────────────────────────   ─────────────────────────
  feishu        {FILE_PREFIX}f_{yymmdd}.pdf  /apps/{APP_FOLDER}/Feishu
  wecom         {FILE_PREFIX}w_{yymmdd}.pdf  /apps/{APP_FOLDER}/WeCom
  xiaohongshu   {FILE_PREFIX}r_{yymmdd}.pdf  /apps/{APP_FOLDER}/Red

  Place WM.Feishu.png, WM.WeCOM.png or WM.Red.png in the asset directory to
  tile an image instead of the channel's text label.

ENVIRONMENT VARIABLES:
  BAIDU_AK          Baidu open-platform app key
  BAIDU_SK          Baidu open-platform secret key
  APP_FOLDER        Folder under /apps/ on the drive (default PDF_Distributor)
  FILE_PREFIX       Artifact name prefix (default Dist)
  SYS_PASSWORD      Access key required by the web server (x-access-key header)
  PDFIUM_LIB_PATH   Path to libpdfium or its directory
  RUST_LOG          Log filter, e.g. pdf_distributor=debug
"#;

/// Watermark, encrypt and upload PDFs to per-channel drive folders.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-distributor",
    version,
    about = "Watermark, encrypt and upload PDFs to per-channel drive folders",
    long_about = "Rasterize a PDF once, stamp a channel-specific watermark grid on every \
page, rebuild it as an image-only PDF, lock it with AES-256 and upload it to the channel's \
Baidu Netdisk folder. Channels: feishu, wecom, xiaohongshu.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF_DISTRIBUTOR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF_DISTRIBUTOR_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server.
    Serve(ServeArgs),
    /// Distribute one local PDF.
    Run(RunArgs),
    /// Authorize the drive.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand, Debug)]
enum AuthAction {
    /// Print the URL that shows an authorization code.
    Url(DriveArgs),
    /// Exchange an authorization code for a token.
    Activate {
        /// Code shown after granting access.
        code: String,
        #[command(flatten)]
        drive: DriveArgs,
    },
    /// Check whether the stored token is accepted.
    Status(DriveArgs),
}

/// Drive credentials and session file, shared by every subcommand.
#[derive(Args, Debug, Clone)]
struct DriveArgs {
    /// Baidu app key.
    #[arg(long, env = "BAIDU_AK", hide_env_values = true, default_value = "")]
    baidu_ak: String,

    /// Baidu secret key.
    #[arg(long, env = "BAIDU_SK", hide_env_values = true, default_value = "")]
    baidu_sk: String,

    /// Where the drive token is persisted.
    #[arg(long, env = "PDF_DISTRIBUTOR_TOKEN_FILE", default_value = DEFAULT_TOKEN_FILE)]
    token_file: PathBuf,

    /// Per-request drive timeout in seconds.
    #[arg(long, env = "PDF_DISTRIBUTOR_UPLOAD_TIMEOUT", default_value_t = 120)]
    upload_timeout: u64,
}

/// Settings that shape the artifacts.
#[derive(Args, Debug, Clone)]
struct ArtifactArgs {
    /// Folder under /apps/ on the drive.
    #[arg(long, env = "APP_FOLDER", default_value = DEFAULT_APP_FOLDER)]
    app_folder: String,

    /// Artifact file name prefix.
    #[arg(long, env = "FILE_PREFIX", default_value = DEFAULT_FILE_PREFIX)]
    file_prefix: String,

    /// Directory holding WM.*.png watermark assets.
    #[arg(long, env = "PDF_DISTRIBUTOR_ASSET_DIR", default_value = ".")]
    asset_dir: PathBuf,

    /// TTF/OTF font for text watermarks (default: embedded DejaVu Sans Mono).
    #[arg(long, env = "PDF_DISTRIBUTOR_FONT")]
    font: Option<PathBuf>,

    /// Rasterization DPI (72–400).
    #[arg(long, env = "PDF_DISTRIBUTOR_DPI", default_value_t = 180,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// JPEG quality of the rebuilt pages (1–100).
    #[arg(long, env = "PDF_DISTRIBUTOR_JPEG_QUALITY", default_value_t = 80,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Retries after a transient upload failure.
    #[arg(long, env = "PDF_DISTRIBUTOR_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Skip uploads whose file name already exists in the target folder.
    #[arg(long, env = "PDF_DISTRIBUTOR_SKIP_EXISTING")]
    skip_existing: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "PDF_DISTRIBUTOR_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind.
    #[arg(long, env = "PDF_DISTRIBUTOR_PORT", default_value_t = 8501)]
    port: u16,

    /// Access key required in the x-access-key header.
    #[arg(long, env = "SYS_PASSWORD", hide_env_values = true)]
    access_key: Option<String>,

    #[command(flatten)]
    drive: DriveArgs,

    #[command(flatten)]
    artifact: ArtifactArgs,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Source PDF.
    input: PathBuf,

    /// Channels: all, or a comma-separated list (feishu,wecom,xiaohongshu).
    #[arg(short, long, default_value = "all")]
    channels: String,

    /// Open password for every artifact (default 888888).
    #[arg(long, env = "PDF_DISTRIBUTOR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Permissions password for every artifact.
    #[arg(long, env = "PDF_DISTRIBUTOR_OWNER_PASSWORD", hide_env_values = true)]
    owner_password: Option<String>,

    /// Password of an encrypted source PDF.
    #[arg(long)]
    source_password: Option<String>,

    /// Fixed yymmdd stamp for file names instead of today's date.
    #[arg(long)]
    date_stamp: Option<String>,

    /// Write artifacts into this directory instead of uploading them.
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Print the DistributionReport as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PDF_DISTRIBUTOR_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    drive: DriveArgs,

    #[command(flatten)]
    artifact: ArtifactArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // A one-shot run with a progress bar keeps library logs at error level;
    // the server logs at info so every request leaves a trace.
    let show_progress = match &cli.command {
        Command::Run(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Run(args) => run(args, show_progress, cli.quiet).await,
        Command::Auth { action } => auth(action).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = build_config(&args.artifact, None, None, None)?;
    let drive = open_drive(&args.drive).await?;
    if !args.drive.credentials().is_complete() {
        tracing::warn!("BAIDU_AK / BAIDU_SK not set; uploads will fail until they are configured");
    }
    if !drive.session().is_authorized().await {
        tracing::warn!(
            "No drive token in {}; authorize via GET /auth/url then POST /auth/code",
            args.drive.token_file.display()
        );
    }

    let state = AppState::new(config, Arc::new(drive), args.access_key);
    server::serve(&args.host, args.port, state)
        .await
        .context("Web server failed")
}

async fn run(args: RunArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let channels = parse_channel_list(&args.channels).context("Invalid --channels")?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn DistributionProgressCallback>)
    } else {
        None
    };
    let config = build_config(
        &args.artifact,
        progress_cb,
        args.date_stamp.clone(),
        args.source_password.as_deref(),
    )?;

    let plans: Vec<ChannelPlan> = channels
        .iter()
        .map(|&c| {
            let mut plan = ChannelPlan::new(c);
            if let Some(ref p) = args.password {
                plan = plan.with_user_password(p);
            }
            if let Some(ref p) = args.owner_password {
                plan = plan.with_owner_password(p);
            }
            plan
        })
        .collect();

    let source = SourceDocument::open(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let report = match args.out_dir {
        Some(ref dir) => distribute_to_dir(&source, &plans, &config, dir).await,
        None => {
            let drive = open_drive(&args.drive).await?;
            distribute(&source, &plans, &config, &drive).await
        }
    }
    .context("Distribution failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !quiet {
        print_summary(&report, show_progress);
    }

    if report.needs_reauthorization() {
        anyhow::bail!("Drive authorization expired; run `pdf-distributor auth url` to re-authorize");
    }
    if !report.all_succeeded() {
        anyhow::bail!("{} of {} channels failed", report.stats.failed, report.stats.total_channels);
    }
    Ok(())
}

fn print_summary(report: &DistributionReport, show_progress: bool) {
    if !show_progress {
        for ch in &report.channels {
            match (&ch.error, &ch.remote, &ch.local_path) {
                (Some(e), _, _) => eprintln!("{} {:<12} {}", red("✗"), ch.channel.display_name(), e),
                (None, Some(remote), _) => {
                    eprintln!("{} {:<12} {}", green("✓"), ch.channel.display_name(), remote.path)
                }
                (None, None, Some(path)) => eprintln!("{} {:<12} {}", green("✓"), ch.channel.display_name(), path),
                (None, None, None) => {}
            }
        }
    }
    eprintln!(
        "   {} pages  /  rasterized in {}ms  /  {}ms total",
        dim(&report.page_count.to_string()),
        report.stats.rasterize_duration_ms,
        report.stats.total_duration_ms,
    );
}

async fn auth(action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Url(drive_args) => {
            let drive = open_drive(&drive_args).await?;
            require_credentials(&drive_args)?;
            let url = drive.authorize_url().context("Cannot build authorization URL")?;
            println!("{url}");
            eprintln!(
                "{} Open the URL, grant access, then run {}",
                cyan("◆"),
                bold("pdf-distributor auth activate <CODE>")
            );
        }
        AuthAction::Activate { code, drive: drive_args } => {
            require_credentials(&drive_args)?;
            let drive = open_drive(&drive_args).await?;
            let record = drive.activate(&code).await.context("Authorization failed")?;
            eprintln!(
                "{} Authorized (scope: {}); token saved to {}",
                green("✔"),
                if record.scope.is_empty() { "-" } else { record.scope.as_str() },
                bold(&drive_args.token_file.display().to_string()),
            );
        }
        AuthAction::Status(drive_args) => {
            let drive = open_drive(&drive_args).await?;
            let token = drive.session().token().await;
            let Some(token) = token else {
                println!("{} no token in {}", red("✘"), drive_args.token_file.display());
                return Ok(());
            };
            let valid = drive.check_auth().await.context("Cannot reach the drive")?;
            let expiry = token
                .expires_at()
                .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
                .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "unknown".into());
            if valid {
                println!("{} authorized  {}", green("✔"), dim(&format!("expires {expiry}")));
            } else {
                println!(
                    "{} token rejected  {}",
                    red("✘"),
                    dim("run `pdf-distributor auth url` to re-authorize")
                );
            }
        }
    }
    Ok(())
}

impl DriveArgs {
    fn credentials(&self) -> DriveCredentials {
        DriveCredentials::new(self.baidu_ak.trim(), self.baidu_sk.trim())
    }
}

fn require_credentials(args: &DriveArgs) -> Result<()> {
    if !args.credentials().is_complete() {
        anyhow::bail!("BAIDU_AK and BAIDU_SK must both be set");
    }
    Ok(())
}

async fn open_drive(args: &DriveArgs) -> Result<BaiduDrive> {
    let session = Arc::new(Session::load(TokenStore::new(&args.token_file)).await);
    BaiduDrive::new(args.credentials(), session, args.upload_timeout).context("Failed to create drive client")
}

/// Map CLI args to `DistributorConfig`.
fn build_config(
    args: &ArtifactArgs,
    progress: Option<ProgressCallback>,
    date_stamp: Option<String>,
    source_password: Option<&str>,
) -> Result<DistributorConfig> {
    let mut builder = DistributorConfig::builder()
        .dpi(args.dpi)
        .jpeg_quality(args.jpeg_quality)
        .app_folder(args.app_folder.trim())
        .file_prefix(args.file_prefix.trim())
        .asset_dir(&args.asset_dir)
        .max_retries(args.max_retries)
        .skip_existing(args.skip_existing);

    if let Some(ref font) = args.font {
        builder = builder.font_path(font);
    }
    if let Some(stamp) = date_stamp {
        builder = builder.date_stamp(stamp);
    }
    if let Some(pwd) = source_password {
        builder = builder.source_password(pwd);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

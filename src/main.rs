//! mjpeg-relay command line
//!
//! ```text
//! mjpeg-relay serve --source rtsp://camera/stream --filters "framerate=2,scale=800:600"
//! mjpeg-relay capture --source rtsp://camera/stream --out ./frames --count 10
//! ```
//!
//! Every flag can also be set through a `MJPEG_RELAY_*` environment variable.
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mjpeg_relay::media::jpeg::DEFAULT_QUALITY;
use mjpeg_relay::{
    source, Distributor, Error, LocalPolicy, RegistryConfig, RelayServer, ServerConfig, SourceConfig,
    StillImage, ViewConfig, ViewerPolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay an ffmpeg MJPEG stream to HTTP viewers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the live stream over HTTP
    Serve(ServeArgs),
    /// Write decoded frames to a directory as img-<n>.jpeg
    Capture(CaptureArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Input passed to ffmpeg with -i (URL or path)
    #[arg(long, env = "MJPEG_RELAY_SOURCE")]
    source: String,

    /// ffmpeg video filter chain (-vf), empty for none
    #[arg(long, env = "MJPEG_RELAY_FILTERS", default_value = "")]
    filters: String,

    /// ffmpeg executable
    #[arg(long, env = "MJPEG_RELAY_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: String,

    /// Seconds to wait before restarting ffmpeg after it exits
    #[arg(long, env = "MJPEG_RELAY_RESTART_DELAY", default_value_t = 0)]
    restart_delay: u64,
}

impl SourceArgs {
    fn config(&self) -> mjpeg_relay::Result<SourceConfig> {
        if self.source.trim().is_empty() {
            return Err(Error::Config("--source must not be empty".into()));
        }
        Ok(SourceConfig::ffmpeg(&self.source, &self.filters)
            .program(&self.ffmpeg)
            .restart_delay(Duration::from_secs(self.restart_delay)))
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Address to listen on
    #[arg(long, env = "MJPEG_RELAY_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Maximum seconds a viewer may watch (0 = unlimited)
    #[arg(long, env = "MJPEG_RELAY_VIEW_LIMIT", default_value_t = 0)]
    view_limit: u64,

    /// JPEG shown once when the view limit is reached
    #[arg(long, env = "MJPEG_RELAY_AFTER_LIMIT")]
    after_limit: Option<PathBuf>,

    /// JPEG shown instead of live frames while viewing is denied
    #[arg(long, env = "MJPEG_RELAY_DENY_IMAGE")]
    deny_image: Option<PathBuf>,

    /// Reject viewers beyond this many
    #[arg(long, env = "MJPEG_RELAY_MAX_VIEWERS")]
    max_viewers: Option<usize>,

    /// Stop ffmpeg while nobody is watching
    #[arg(long, env = "MJPEG_RELAY_PAUSE_ON_IDLE")]
    pause_on_idle: bool,

    /// JPEG quality for live frames (1-100)
    #[arg(long, env = "MJPEG_RELAY_QUALITY", default_value_t = DEFAULT_QUALITY)]
    quality: u8,
}

#[derive(Args, Debug)]
struct CaptureArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Output directory
    #[arg(long, env = "MJPEG_RELAY_OUT", default_value = ".")]
    out: PathBuf,

    /// Stop after this many frames
    #[arg(long, env = "MJPEG_RELAY_COUNT")]
    count: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Capture(args) => capture(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> mjpeg_relay::Result<()> {
    let mut policy = LocalPolicy::new();
    if let Some(max) = args.max_viewers {
        policy = policy.max_viewers(max);
    }
    if let Some(path) = &args.deny_image {
        policy = policy.deny_image(StillImage::open(path)?);
    }
    let policy: Arc<dyn ViewerPolicy> = Arc::new(policy);

    let mut view = ViewConfig::default().limit(Duration::from_secs(args.view_limit));
    if let Some(path) = &args.after_limit {
        view = view.after_limit(StillImage::open(path)?);
    }

    let mut source_config = args.source.config()?;
    if args.pause_on_idle {
        source_config = source_config.pause_on_idle();
    }
    let frames = source::open(source_config)?;

    let registry_config = RegistryConfig::default()
        .quality(args.quality)
        .pause_when_idle(args.pause_on_idle);
    let distributor = Distributor::with_config(registry_config, Arc::clone(&policy));
    let pump = distributor.spawn(frames);

    let server = RelayServer::new(
        ServerConfig::with_addr(args.bind).view(view),
        distributor.clone(),
        policy,
    );

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    pump.abort();
    let stats = distributor.stats();
    tracing::info!(
        frames_encoded = stats.frames_encoded,
        frames_delivered = stats.frames_delivered,
        overwrite_ratio = stats.overwrite_ratio(),
        "Relay stopped"
    );

    result
}

async fn capture(args: CaptureArgs) -> mjpeg_relay::Result<()> {
    let mut frames = source::open(args.source.config()?)?;

    let written = source::capture(&mut frames, &args.out, args.count, DEFAULT_QUALITY).await?;

    let stats = frames.stats();
    tracing::info!(
        written = written,
        decode_errors = stats.decode_errors,
        restarts = stats.spawns.saturating_sub(1),
        "Capture finished"
    );
    Ok(())
}

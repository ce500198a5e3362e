//! Bluetooth PCM player - CLI binary.
//!
//! Opens a playback session with the audio daemon, converts a WAV file to
//! the negotiated layout and writes it period by period in real time.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use bt_pcm::audio::read_wav;
use bt_pcm::{
    ControlAddress, Direction, HwParams, IoMode, PcmSession, PipelineConfig, PipelineStats,
};
use bt_pcm_common::ipc::SOCKET_NAME;
use bt_pcm_common::{init_tracing, ColorWhen, MetricsContext, MetricsServerConfig};

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

impl From<ColorArg> for ColorWhen {
    fn from(v: ColorArg) -> Self {
        match v {
            ColorArg::Auto => ColorWhen::Auto,
            ColorArg::Always => ColorWhen::Always,
            ColorArg::Never => ColorWhen::Never,
        }
    }
}

/// Bluetooth PCM player - stream a WAV file to a Bluetooth audio device
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // ---
    /// Input audio file (WAV format)
    #[arg(short, long)]
    input: PathBuf,

    /// Audio daemon control socket in the abstract namespace
    #[arg(long, default_value = SOCKET_NAME)]
    control_name: String,

    /// Audio daemon control socket path; overrides `--control-name`
    #[arg(long)]
    control_path: Option<PathBuf>,

    /// Period size in frames
    #[arg(short, long, default_value = "1024")]
    period_frames: u64,

    /// Periods in the ring buffer
    #[arg(long, default_value = "4")]
    periods: u64,

    /// Send attempts per media packet
    #[arg(long, default_value = "10")]
    flush_attempts: u32,

    /// Pause between send attempts in milliseconds
    #[arg(long, default_value = "150")]
    retry_interval_ms: u64,

    /// Prometheus metrics bind address (serves `GET /metrics`).
    #[arg(long)]
    metrics_bind: Option<String>,

    /// Coloring
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorArg,
}

impl Args {
    // ---
    fn pipeline_config(&self) -> PipelineConfig {
        // ---
        let control_address = match &self.control_path {
            Some(path) => ControlAddress::Path(path.clone()),
            None => ControlAddress::Abstract(self.control_name.clone()),
        };
        PipelineConfig {
            control_address,
            flush_attempts: self.flush_attempts,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }
}

/// Capture version number from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let args = Args::parse();
    init_tracing(args.color.into(), None)?;

    info!("Starting Bluetooth PCM player v{VERSION}");
    info!("Input file: {}", args.input.display());
    info!("Period: {} frames x {}", args.period_frames, args.periods);

    let metrics = match &args.metrics_bind {
        Some(bind) => {
            let metrics = MetricsContext::new("bt-pcm-play")?;
            let bind = bind.parse().context("invalid metrics bind")?;
            let _metrics_task = metrics.spawn_metrics_server(MetricsServerConfig::new(bind));
            info!("Metrics bind: {bind}");
            Some(metrics)
        }
        None => None,
    };

    let pipeline = args.pipeline_config();
    let input = args.input.clone();
    let (period, periods) = (args.period_frames, args.periods);

    let stats = tokio::task::spawn_blocking(move || play(&input, &pipeline, period, periods, metrics))
        .await
        .context("playback task failed")??;

    stats.log();
    if stats.lossy_flushes() > 0 {
        warn!("{} media packets were lost in whole or in part", stats.lossy_flushes());
    }
    Ok(())
}

/// Runs one playback session to the end of the file.
fn play(
    input: &Path,
    pipeline: &PipelineConfig,
    period: u64,
    periods: u64,
    metrics: Option<MetricsContext>,
) -> Result<PipelineStats> {
    // ---
    let mut session = PcmSession::open(Direction::Playback, pipeline)
        .context("failed to open Bluetooth PCM session")?;
    if let Some(metrics) = metrics {
        session = session.with_metrics(metrics);
    }

    let config = *session.config();
    let audio = read_wav(input, usize::from(config.channels), config.rate)?;
    let frame_size = audio.frame_size();

    session
        .hw_params(HwParams::new(frame_size, period * periods, period))
        .context("host parameters rejected")?;
    session.prepare()?;
    session.start()?;

    let bytes = audio.to_host_bytes();
    let period_bytes = period as usize * frame_size;
    let started = Instant::now();
    let mut offset = 0;
    let mut frames_written: u64 = 0;

    while bytes.len() - offset >= frame_size {
        let end = (offset + period_bytes).min(bytes.len());
        let frames = session
            .write(&bytes[offset..end], IoMode::Blocking)
            .with_context(|| format!("write failed after {frames_written} frames"))?;
        offset += frames * frame_size;
        frames_written += frames as u64;

        // Pace to real time.
        let due = Duration::from_secs_f64(frames_written as f64 / f64::from(config.rate));
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            thread::sleep(wait);
        }
    }

    if let Some(outcome) = session.drain(IoMode::Blocking)? {
        info!("Final packet: {outcome:?}");
    }
    session.stop()?;

    info!(
        "Played {frames_written} frames in {:.2}s",
        started.elapsed().as_secs_f64()
    );
    let stats = session.stats().clone();
    session.close();
    Ok(stats)
}

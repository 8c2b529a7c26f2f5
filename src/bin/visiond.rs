//! visiond - live object-detection dashboard pipeline daemon.
//!
//! This daemon:
//! 1. Opens a video source (frame directory or stub:// synthetic)
//! 2. Connects the persistent channel to the detector service
//! 3. Samples frames on a timer and publishes them as JPEG data URIs
//! 4. Consumes detection results into the stats board and overlay
//! 5. Logs the per-label stats table periodically

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use vision_dash::api::{Credentials, DashboardApi};
use vision_dash::channel::{DetectorChannel, FrameSink};
use vision_dash::config::VisiondConfig;
use vision_dash::session::SessionController;
use vision_dash::source::open_source;
use vision_dash::{Mode, ViewHandle};

#[derive(Parser, Debug)]
#[command(author, version, about = "Live object-detection dashboard pipeline")]
struct Args {
    /// Video source: a directory of frames or stub://WxH.
    #[arg(long)]
    source: Option<String>,

    /// Target label for Single mode.
    #[arg(long)]
    target: Option<String>,

    /// Counting mode: all or single.
    #[arg(long)]
    mode: Option<String>,

    /// Frame sampling period in milliseconds (50..=1000).
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Upload this video file to the dashboard backend before streaming.
    #[arg(long)]
    upload: Option<PathBuf>,

    /// Dashboard username (with VISION_PASSWORD) for authenticated calls.
    #[arg(long, env = "VISION_USERNAME")]
    username: Option<String>,

    /// Seconds between stats table log lines.
    #[arg(long, default_value_t = 10)]
    stats_log_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = VisiondConfig::load()?;
    if let Some(source) = args.source {
        cfg.source = source;
    }
    if let Some(target) = args.target {
        cfg.view.target = target;
    }
    if let Some(mode) = args.mode {
        cfg.view.mode = mode.parse::<Mode>()?;
    }
    if let Some(interval) = args.interval_ms {
        cfg.view.sample_interval_ms = interval;
    }
    cfg.view.validate()?;

    let api_base = Url::parse(&cfg.api_base).context("invalid api_base URL")?;
    let mut api = DashboardApi::new(api_base);
    if let Some(username) = args.username {
        let password = std::env::var("VISION_PASSWORD")
            .map_err(|_| anyhow!("VISION_PASSWORD must be set when --username is given"))?;
        api.authenticate(&Credentials { username, password })?;
        log::info!("authenticated against dashboard backend");
    }
    match api.fetch_labels() {
        Ok(labels) if labels.is_empty() => {
            log::info!("detector label set not yet available")
        }
        Ok(labels) => {
            if cfg.view.mode == Mode::Single
                && !labels.iter().any(|l| l.eq_ignore_ascii_case(&cfg.view.target))
            {
                log::warn!(
                    "target '{}' is not in the detector label set ({} labels)",
                    cfg.view.target,
                    labels.len()
                );
            }
        }
        Err(e) => log::warn!("label fetch failed, continuing without label set: {}", e),
    }
    if let Some(path) = args.upload {
        api.upload_video(&path)?;
        log::info!("uploaded {}", path.display());
    }

    let (channel, detections) = DetectorChannel::connect(&cfg.channel)?;
    let channel = Arc::new(channel);
    log::info!(
        "channel to {}:{} (frames -> {}, detections <- {})",
        cfg.channel.broker_host,
        cfg.channel.broker_port,
        cfg.channel.frames_topic,
        cfg.channel.detections_topic
    );

    let mut source = open_source(&cfg.source)?;
    source.play();
    log::info!("source {} opened", cfg.source);

    let view = ViewHandle::new(cfg.view.clone())?;
    let session = SessionController::start(
        view,
        source,
        Arc::clone(&channel) as Arc<dyn FrameSink>,
        detections,
        cfg.display,
    );

    let running = Arc::new(AtomicBool::new(true));
    let ctrlc_running = Arc::clone(&running);
    ctrlc::set_handler(move || {
        ctrlc_running.store(false, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    let log_period = Duration::from_secs(args.stats_log_secs.max(1));
    let mut last_log = std::time::Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
        if last_log.elapsed() >= log_period {
            last_log = std::time::Instant::now();
            let stats = session.stats_snapshot();
            if stats.is_empty() {
                log::info!(
                    "no detections yet ({} frames sent, channel {})",
                    session.sampler_frames_sent(),
                    if channel.is_open() { "open" } else { "closed" }
                );
            } else {
                for (label, stat) in &stats {
                    log::info!("{}: current={} max={}", label, stat.current, stat.max);
                }
            }
        }
    }

    log::info!("shutting down");
    session.shutdown();
    match Arc::try_unwrap(channel) {
        Ok(channel) => channel.disconnect()?,
        Err(_) => log::warn!("channel still shared at shutdown, leaving it to the OS"),
    }
    Ok(())
}

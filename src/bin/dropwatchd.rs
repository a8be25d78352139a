//! dropwatchd - ROI drop-detection sentinel daemon
//!
//! This daemon:
//! 1. Loads layered configuration (JSON file + environment overrides)
//! 2. Connects the MQTT command channel (the only fatal failure point)
//! 3. Rasterizes the ROI polygon for the configured frame geometry
//! 4. Polls for `START`/`STOP` commands and runs detection sessions
//! 5. Pushes `S0` on detection; times out silently unless configured

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use dropwatch::{
    DropwatchConfig, MqttChannel, RtspOpener, SessionController,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch a camera ROI for object drops")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "DROPWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Video source descriptor override (stub://..., rtsp://..., device:N).
    #[arg(long)]
    camera: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = DropwatchConfig::load_from(args.config.as_deref())?;
    if let Some(camera) = args.camera {
        cfg.camera.descriptor = camera;
    }

    // Without a command channel there is nothing to arm the detector;
    // abort before any session logic runs.
    let channel = MqttChannel::connect(&cfg.mqtt)?;

    let mask = cfg.roi.rasterize(cfg.camera.width, cfg.camera.height);
    let opener = RtspOpener::new(cfg.rtsp_config());
    let controller = SessionController::new(channel, Box::new(opener), mask, cfg.session_params());

    #[cfg(feature = "snapshot")]
    let controller = match &cfg.snapshot_dir {
        Some(dir) => {
            let writer = dropwatch::SnapshotWriter::new(dir)?;
            log::info!("debug snapshots enabled in {}", dir.display());
            controller.with_snapshots(writer)
        }
        None => controller,
    };
    #[cfg(not(feature = "snapshot"))]
    if let Some(dir) = &cfg.snapshot_dir {
        log::warn!(
            "snapshot_dir {} configured but the snapshot feature is not built",
            dir.display()
        );
    }

    let mut controller = controller;

    let shutdown = controller.shutdown_flag();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("install shutdown handler")?;

    log::info!(
        "dropwatchd running: camera={} threshold={} limit={} budget={}s",
        cfg.camera.descriptor,
        cfg.detection.threshold,
        cfg.detection.detect_frame_limit,
        cfg.session.budget.as_secs()
    );

    controller.run();

    let channel = controller.into_channel();
    if let Err(e) = channel.disconnect() {
        log::warn!("channel disconnect failed: {}", e);
    }
    log::info!("dropwatchd stopped");
    Ok(())
}

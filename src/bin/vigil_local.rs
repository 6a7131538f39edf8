//! vigil_local - single-threaded run of the pipeline.
//!
//! Capture, classification, alert delivery and telemetry all happen on the
//! calling thread; there is no viewer server. Useful on a workstation with a
//! USB camera, or against `stub://` devices for a quick end-to-end check.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use vigil::config::VigilConfig;
use vigil::{
    policy_for_mode, Broadcaster, ClassifierMode, DeviceCandidate, FanOut, Notifier, Pipeline,
    PipelineComponents, ScreenshotStore, SystemDevices,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the alert pipeline in the foreground")]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the classifier mode (presence or posture).
    #[arg(long)]
    mode: Option<ClassifierMode>,

    /// Override the device list (`id` or `id@backend`, repeatable).
    #[arg(long = "device")]
    devices: Vec<DeviceCandidate>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut cfg = VigilConfig::load_from(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        cfg.mode = mode;
    }
    if !args.devices.is_empty() {
        cfg.devices = args.devices;
    }

    let notifier = Arc::new(Notifier::new(
        FanOut::from_config(&cfg.notification),
        cfg.notification_interval,
    ));
    let components = PipelineComponents {
        model: cfg.detection_model()?,
        policy: policy_for_mode(cfg.mode),
        broadcaster: Arc::new(Broadcaster::new(cfg.telemetry.subscriber_queue)),
        alerts: notifier,
        screenshots: ScreenshotStore::new(&cfg.screenshot_dir)?,
    };
    let pipeline = Pipeline::new(components, cfg.pipeline_settings());
    let status = pipeline.status();

    let stop = status.clone();
    ctrlc::set_handler(move || stop.request_stop())?;

    let active = pipeline
        .start(&cfg.selector(), &SystemDevices::new(cfg.capture.clone()))
        .map_err(|err| anyhow!(err))?;
    log::info!("running in the foreground, Ctrl-C to stop");
    if let Err(err) = active.run() {
        log::warn!("{}", err);
    }
    log::info!(
        "processed {} frames, raised {} alerts",
        status.frames_processed(),
        status.alerts_raised()
    );
    Ok(())
}

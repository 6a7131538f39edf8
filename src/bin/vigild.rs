//! vigild - camera alert daemon
//!
//! This daemon:
//! 1. Selects a capture device from the configured preference list
//! 2. Runs the detection pipeline on its own thread
//! 3. Hands throttled alerts to the notification dispatcher thread
//! 4. Serves /health, /status, the live /stream and a viewer page
//!
//! Ctrl-C stops the pipeline, then the API server, then drains pending alerts.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use vigil::api::{ApiConfig, ApiServer, ApiState};
use vigil::config::VigilConfig;
use vigil::{
    policy_for_mode, AlertDispatcher, Broadcaster, FanOut, Notifier, Pipeline, PipelineComponents,
    ScreenshotStore, SystemDevices,
};

const ALERT_QUEUE: usize = 8;

#[derive(Parser, Debug)]
#[command(author, version, about = "Camera alert daemon with live viewer stream")]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = VigilConfig::load_from(args.config.as_deref())?;

    let channels = cfg.notification.configured_channels();
    if channels.is_empty() {
        log::warn!("no notification channels configured; alerts will only be logged");
    } else {
        log::info!("notification channels: {:?}", channels);
    }
    let notifier = Notifier::new(
        FanOut::from_config(&cfg.notification),
        cfg.notification_interval,
    );
    let dispatcher = Arc::new(AlertDispatcher::spawn(notifier, ALERT_QUEUE)?);

    let broadcaster = Arc::new(Broadcaster::new(cfg.telemetry.subscriber_queue));
    let components = PipelineComponents {
        model: cfg.detection_model()?,
        policy: policy_for_mode(cfg.mode),
        broadcaster: broadcaster.clone(),
        alerts: dispatcher.clone(),
        screenshots: ScreenshotStore::new(&cfg.screenshot_dir)?,
    };
    let pipeline = Pipeline::new(components, cfg.pipeline_settings());

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
            ..ApiConfig::default()
        },
        ApiState {
            broadcaster: broadcaster.clone(),
            pipeline: pipeline.status(),
        },
    )
    .spawn()?;
    log::info!("api listening on http://{}", api_handle.addr);

    let opener = SystemDevices::new(cfg.capture.clone());
    let active = match pipeline.start(&cfg.selector(), &opener) {
        Ok(active) => active,
        Err(err) => {
            api_handle.stop()?;
            dispatcher.shutdown();
            return Err(anyhow!(err));
        }
    };
    let handle = active.spawn()?;
    let status = handle.status();

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    log::info!(
        "vigild running; screenshots in {}",
        cfg.screenshot_dir.display()
    );

    loop {
        if rx.recv_timeout(Duration::from_millis(200)).is_ok() {
            log::info!("shutdown signal received, stopping pipeline...");
            break;
        }
        if handle.is_finished() {
            break;
        }
    }

    handle.stop();
    let outcome = handle.join();
    api_handle.stop()?;
    dispatcher.shutdown();
    log::info!(
        "vigild stopped after {} frames, {} alerts",
        status.frames_processed(),
        status.alerts_raised()
    );

    if let Err(err) = outcome {
        log::error!("pipeline ended: {:#}", err);
    }
    Ok(())
}

//! The capture loop.
//!
//! `Pipeline::start` selects a device (Starting -> Running, or Failed when no
//! candidate works). `ActivePipeline` then repeats: read frame -> infer ->
//! classify -> trigger throttle -> screenshot + alert -> annotate -> publish,
//! until the stop flag is set (Running -> Stopping) or the device stops
//! producing frames. The device is dropped before the state reaches Stopped.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::broadcast::{Broadcaster, FrameSummary, PublishReport};
use crate::classify::{classify_frame, ClassificationPolicy, ClassifierMode, FrameAssessment};
use crate::detect::DetectionModel;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::ingest::{CaptureDevice, DeviceOpener, DeviceSelector};
use crate::notify::{AlertEvent, AlertSink};
use crate::render::{annotate, encode_jpeg, Overlay};
use crate::screenshot::ScreenshotStore;
use crate::throttle::AlertThrottle;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    #[default]
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Pipeline state shared with the API server and signal handlers.
#[derive(Debug, Default)]
pub struct PipelineStatus {
    state: Mutex<PipelineState>,
    device: Mutex<Option<String>>,
    frames_processed: AtomicU64,
    alerts_raised: AtomicU64,
    stop: AtomicBool,
}

impl PipelineStatus {
    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: PipelineState) {
        let mut current = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != state {
            log::info!("pipeline {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    pub fn device(&self) -> Option<String> {
        self.device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::SeqCst)
    }

    pub fn alerts_raised(&self) -> u64 {
        self.alerts_raised.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Trigger-layer throttle interval (screenshot + alert).
    pub alert_interval: Duration,
    /// JPEG quality for broadcast frames.
    pub jpeg_quality: u8,
    /// Loop pacing; 0 runs as fast as the device delivers.
    pub target_fps: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            alert_interval: Duration::from_secs(60),
            jpeg_quality: 70,
            target_fps: 10,
        }
    }
}

pub struct PipelineComponents {
    pub model: Box<dyn DetectionModel>,
    pub policy: Box<dyn ClassificationPolicy>,
    pub broadcaster: Arc<Broadcaster>,
    pub alerts: Arc<dyn AlertSink>,
    pub screenshots: ScreenshotStore,
}

/// What happened to one frame.
#[derive(Debug)]
pub struct FrameReport {
    pub sequence: u64,
    pub assessment: FrameAssessment,
    pub alert_raised: bool,
    pub screenshot: Option<PathBuf>,
    /// `None` when the frame could not be annotated or encoded.
    pub published: Option<PublishReport>,
}

pub struct Pipeline {
    components: PipelineComponents,
    settings: PipelineSettings,
    status: Arc<PipelineStatus>,
}

impl Pipeline {
    pub fn new(components: PipelineComponents, settings: PipelineSettings) -> Self {
        Self {
            components,
            settings,
            status: Arc::new(PipelineStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<PipelineStatus> {
        self.status.clone()
    }

    /// Opens the first usable device. The probe frame read during selection
    /// is the first frame processed.
    pub fn start(
        mut self,
        selector: &DeviceSelector,
        opener: &dyn DeviceOpener,
    ) -> Result<ActivePipeline, PipelineError> {
        self.status.set_state(PipelineState::Starting);
        let selected = match selector.select(opener) {
            Ok(selected) => selected,
            Err(err) => {
                log::error!("{}", err);
                self.status.set_state(PipelineState::Failed);
                return Err(err);
            }
        };
        if let Err(err) = self.components.model.warm_up() {
            log::warn!("{} model warm-up failed: {:#}", self.components.model.name(), err);
        }

        *self
            .status
            .device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(selected.candidate.to_string());
        self.status.set_state(PipelineState::Running);
        log::info!(
            "{} mode, model={}, alert interval {:?}",
            match self.components.policy.mode() {
                ClassifierMode::Presence => "presence",
                ClassifierMode::Posture => "posture",
            },
            self.components.model.name(),
            self.settings.alert_interval
        );

        Ok(ActivePipeline {
            throttle: AlertThrottle::new(self.settings.alert_interval),
            components: self.components,
            settings: self.settings,
            status: self.status,
            device: selected.device,
            pending: Some(selected.probe_frame),
        })
    }
}

/// A pipeline bound to an open device.
pub struct ActivePipeline {
    components: PipelineComponents,
    settings: PipelineSettings,
    status: Arc<PipelineStatus>,
    device: Box<dyn CaptureDevice>,
    pending: Option<Frame>,
    throttle: AlertThrottle,
}

impl ActivePipeline {
    pub fn status(&self) -> Arc<PipelineStatus> {
        self.status.clone()
    }

    /// Runs until a stop is requested or the device fails. A device failure
    /// is returned as `PipelineError::FrameRead` after a clean shutdown.
    pub fn run(mut self) -> Result<(), PipelineError> {
        let frame_budget = match self.settings.target_fps {
            0 => Duration::ZERO,
            fps => Duration::from_secs(1) / fps,
        };
        let mut last_health_log = Instant::now();
        let mut outcome = Ok(());

        while !self.status.stop_requested() {
            let started = Instant::now();
            let frame = match self.pending.take() {
                Some(frame) => frame,
                None => match self.device.read_frame() {
                    Ok(frame) => frame,
                    Err(err) => {
                        let err = PipelineError::FrameRead {
                            device: self.device.describe(),
                            reason: format!("{:#}", err),
                        };
                        log::error!("{}", err);
                        outcome = Err(err);
                        break;
                    }
                },
            };

            self.process_frame(&frame, frame.captured_instant);

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.device.stats();
                log::info!(
                    "source health={} frames={} source={} viewers={}",
                    self.device.is_healthy(),
                    stats.frames_captured,
                    stats.source,
                    self.components.broadcaster.subscriber_count()
                );
                last_health_log = Instant::now();
            }

            let elapsed = started.elapsed();
            if elapsed < frame_budget {
                thread::sleep(frame_budget - elapsed);
            }
        }

        self.status.set_state(PipelineState::Stopping);
        let status = self.status.clone();
        drop(self);
        status.set_state(PipelineState::Stopped);
        outcome
    }

    /// Runs on a dedicated thread.
    pub fn spawn(self) -> Result<PipelineHandle> {
        let status = self.status.clone();
        let worker = thread::Builder::new()
            .name("vigil-pipeline".to_string())
            .spawn(move || self.run())?;
        Ok(PipelineHandle {
            status,
            worker: Some(worker),
        })
    }

    /// Processes one frame. `now` is the instant the trigger throttle is
    /// evaluated at.
    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> FrameReport {
        let components = &mut self.components;
        let detections = match components.model.infer(frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("inference failed on frame {}: {:#}", frame.sequence, err);
                Vec::new()
            }
        };
        let assessment = classify_frame(components.policy.as_ref(), &detections);
        if components.policy.mode() == ClassifierMode::Presence && assessment.person_count == 0 {
            log::debug!("frame {}: no person detected", frame.sequence);
        }

        let alert_raised =
            assessment.has_alert() && self.throttle.should_fire(components.policy.stream_id(), now);

        let annotated = annotate(
            frame,
            &Overlay {
                verdicts: &assessment.verdicts,
                person_count: assessment.person_count,
                alert_raised,
            },
        );

        let mut screenshot = None;
        if alert_raised {
            screenshot = match &annotated {
                Ok(image) => match components.screenshots.save(image, &frame.captured_at) {
                    Ok(path) => Some(path),
                    Err(err) => {
                        log::warn!("screenshot failed: {:#}", err);
                        None
                    }
                },
                Err(err) => {
                    log::warn!("screenshot skipped, frame could not be annotated: {:#}", err);
                    None
                }
            };
            let message = components.policy.alert_message(
                &assessment,
                &frame.captured_at,
                screenshot.as_deref(),
            );
            log::warn!(
                "{} alert on frame {} ({} of {} detections)",
                components.policy.stream_id(),
                frame.sequence,
                assessment.alert_count(),
                detections.len()
            );
            components.alerts.submit(AlertEvent {
                stream: components.policy.stream_id().to_string(),
                message,
                raised_at: frame.captured_at,
                person_count: assessment.person_count,
                alert_count: assessment.alert_count(),
                screenshot: screenshot.clone(),
            });
            self.status.alerts_raised.fetch_add(1, Ordering::SeqCst);
        }

        let summary = FrameSummary {
            sequence: frame.sequence,
            person_count: assessment.person_count,
            alert_count: assessment.alert_count(),
            timestamp: frame.captured_at,
        };
        let published = match annotated
            .and_then(|image| encode_jpeg(&image, self.settings.jpeg_quality))
        {
            Ok(jpeg) => Some(components.broadcaster.publish(&jpeg, &summary)),
            Err(err) => {
                log::warn!("frame {} not broadcast: {:#}", frame.sequence, err);
                components.broadcaster.record_summary(&summary);
                None
            }
        };
        self.status.frames_processed.fetch_add(1, Ordering::SeqCst);

        FrameReport {
            sequence: frame.sequence,
            assessment,
            alert_raised,
            screenshot,
            published,
        }
    }
}

/// Handle to a pipeline running on its own thread.
pub struct PipelineHandle {
    status: Arc<PipelineStatus>,
    worker: Option<JoinHandle<Result<(), PipelineError>>>,
}

impl PipelineHandle {
    pub fn status(&self) -> Arc<PipelineStatus> {
        self.status.clone()
    }

    pub fn stop(&self) {
        self.status.request_stop();
    }

    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| worker.is_finished())
            .unwrap_or(true)
    }

    /// Waits for the pipeline thread. Returns the device failure that ended
    /// the loop, if any.
    pub fn join(mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => match worker.join() {
                Ok(outcome) => Ok(outcome?),
                Err(_) => Err(anyhow::anyhow!("pipeline thread panicked")),
            },
            None => Ok(()),
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.status.request_stop();
            let _ = worker.join();
        }
    }
}

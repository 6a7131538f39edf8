use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::classify::ClassifierMode;
use crate::detect::{DetectionModel, HttpModel, HttpModelConfig, ScriptedModel};
use crate::ingest::{BackendKind, CaptureSettings, DeviceCandidate, DeviceId, DeviceSelector};
use crate::notify::NotificationConfig;
use crate::pipeline::PipelineSettings;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_DEVICES: [u32; 2] = [0, 1];
const DEFAULT_SCREENSHOT_DIR: &str = "screenshots";
const DEFAULT_ALERT_INTERVAL_SECS: u64 = 60;
const DEFAULT_NOTIFICATION_INTERVAL_SECS: u64 = 300;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_JPEG_QUALITY: u8 = 70;
const DEFAULT_SUBSCRIBER_QUEUE: usize = 4;

#[derive(Debug, Deserialize, Default)]
struct VigilConfigFile {
    devices: Option<DevicesConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    throttle: Option<ThrottleConfigFile>,
    notification: Option<NotificationConfig>,
    screenshot_dir: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
    model: Option<ModelConfigFile>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DevicesConfigFile {
    candidates: Option<Vec<DeviceCandidate>>,
    fallback_backends: Option<Vec<BackendKind>>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    mode: Option<ClassifierMode>,
}

#[derive(Debug, Deserialize, Default)]
struct ThrottleConfigFile {
    alert_interval_secs: Option<u64>,
    notification_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    jpeg_quality: Option<u8>,
    subscriber_queue: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    url: Option<String>,
    persist_tracks: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct VigilConfig {
    pub devices: Vec<DeviceCandidate>,
    pub fallback_backends: Vec<BackendKind>,
    pub capture: CaptureSettings,
    pub mode: ClassifierMode,
    pub alert_interval: Duration,
    pub notification_interval: Duration,
    pub notification: NotificationConfig,
    pub screenshot_dir: PathBuf,
    pub api_addr: String,
    pub telemetry: TelemetrySettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub jpeg_quality: u8,
    pub subscriber_queue: usize,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Inference service; `None` runs the scripted model (no detections).
    pub url: Option<String>,
    pub persist_tracks: bool,
}

impl VigilConfig {
    /// File named by `VIGIL_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIGIL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => VigilConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VigilConfigFile) -> Self {
        let devices = file.devices.unwrap_or_default();
        let throttle = file.throttle.unwrap_or_default();
        let telemetry = file.telemetry.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        Self {
            devices: devices.candidates.unwrap_or_else(|| {
                DEFAULT_DEVICES
                    .iter()
                    .map(|index| DeviceCandidate::new(DeviceId::Index(*index)))
                    .collect()
            }),
            fallback_backends: devices.fallback_backends.unwrap_or_default(),
            capture: CaptureSettings {
                width: file.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: file.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
                target_fps: file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            },
            mode: file
                .classifier
                .and_then(|classifier| classifier.mode)
                .unwrap_or(ClassifierMode::Posture),
            alert_interval: Duration::from_secs(
                throttle
                    .alert_interval_secs
                    .unwrap_or(DEFAULT_ALERT_INTERVAL_SECS),
            ),
            notification_interval: Duration::from_secs(
                throttle
                    .notification_interval_secs
                    .unwrap_or(DEFAULT_NOTIFICATION_INTERVAL_SECS),
            ),
            notification: file.notification.unwrap_or_default(),
            screenshot_dir: file
                .screenshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR)),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            telemetry: TelemetrySettings {
                jpeg_quality: telemetry.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                subscriber_queue: telemetry
                    .subscriber_queue
                    .unwrap_or(DEFAULT_SUBSCRIBER_QUEUE),
            },
            model: ModelSettings {
                url: model.url,
                persist_tracks: model.persist_tracks.unwrap_or(true),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("VIGIL_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(devices) = env_value("VIGIL_DEVICES") {
            self.devices = split_csv(&devices)
                .iter()
                .map(|entry| entry.parse())
                .collect::<Result<Vec<DeviceCandidate>>>()
                .map_err(|e| anyhow!("VIGIL_DEVICES: {}", e))?;
        }
        if let Some(backends) = env_value("VIGIL_FALLBACK_BACKENDS") {
            self.fallback_backends = split_csv(&backends)
                .iter()
                .map(|entry| entry.parse())
                .collect::<Result<Vec<BackendKind>>>()
                .map_err(|e| anyhow!("VIGIL_FALLBACK_BACKENDS: {}", e))?;
        }
        if let Some(mode) = env_value("VIGIL_MODE") {
            self.mode = ClassifierMode::from_str(&mode)?;
        }
        if let Some(dir) = env_value("VIGIL_SCREENSHOT_DIR") {
            self.screenshot_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_value("VIGIL_MODEL_URL") {
            self.model.url = Some(url);
        }
        if let Some(secs) = env_secs("VIGIL_ALERT_INTERVAL_SECS")? {
            self.alert_interval = secs;
        }
        if let Some(secs) = env_secs("VIGIL_NOTIFY_INTERVAL_SECS")? {
            self.notification_interval = secs;
        }

        let notification = &mut self.notification;
        for (key, field) in [
            ("VIGIL_FEISHU_WEBHOOK", &mut notification.feishu_webhook),
            ("VIGIL_WECHAT_WEBHOOK", &mut notification.wechat_webhook),
            ("VIGIL_SMS_PHONE", &mut notification.sms_phone),
            ("VIGIL_SMS_API_KEY", &mut notification.sms_api_key),
            ("VIGIL_SMS_GATEWAY", &mut notification.sms_gateway),
            ("VIGIL_EMAIL_TO", &mut notification.email_to),
            ("VIGIL_EMAIL_FROM", &mut notification.email_from),
            ("VIGIL_EMAIL_PASSWORD", &mut notification.email_password),
        ] {
            if let Some(value) = env_value(key) {
                *field = Some(value);
            }
        }
        if let Some(server) = env_value("VIGIL_SMTP_SERVER") {
            notification.smtp_server = server;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(anyhow!("at least one capture device must be configured"));
        }
        self.api_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api_addr, e))?;
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        if !(1..=100).contains(&self.telemetry.jpeg_quality) {
            return Err(anyhow!("telemetry jpeg_quality must be within 1..=100"));
        }
        if self.telemetry.subscriber_queue == 0 {
            return Err(anyhow!("telemetry subscriber_queue must be greater than zero"));
        }
        if self.notification.smtp_server.trim().is_empty() {
            return Err(anyhow!("smtp_server must not be empty"));
        }
        Ok(())
    }

    pub fn selector(&self) -> DeviceSelector {
        DeviceSelector::new(self.devices.clone())
            .with_fallback_backends(self.fallback_backends.clone())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            alert_interval: self.alert_interval,
            jpeg_quality: self.telemetry.jpeg_quality,
            target_fps: self.capture.target_fps,
        }
    }

    /// HTTP model when a URL is configured, otherwise a model that never
    /// detects anything.
    pub fn detection_model(&self) -> Result<Box<dyn DetectionModel>> {
        match &self.model.url {
            Some(url) => Ok(Box::new(HttpModel::new(HttpModelConfig {
                url: url.clone(),
                persist_tracks: self.model.persist_tracks,
                ..HttpModelConfig::default()
            })?)),
            None => {
                log::warn!("no model url configured; running without detections");
                Ok(Box::new(ScriptedModel::empty()))
            }
        }
    }
}

fn read_config_file(path: &Path) -> Result<VigilConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_secs(key: &str) -> Result<Option<Duration>> {
    match env_value(key) {
        Some(value) => {
            let seconds: u64 = value
                .parse()
                .map_err(|_| anyhow!("{} must be an integer number of seconds", key))?;
            Ok(Some(Duration::from_secs(seconds)))
        }
        None => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

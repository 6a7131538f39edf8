//! Alert notification.
//!
//! `FanOut` sends one message to every channel in a fixed order (Feishu, WeCom,
//! SMS, email). Channels fail independently: a failure becomes that channel's
//! `ChannelResult` and never stops the others. `Notifier` adds the delivery
//! throttle on top, and `AlertDispatcher` runs a `Notifier` on its own thread so
//! the capture loop never waits on the network.

mod email;
mod sms;
mod webhook;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::throttle::AlertThrottle;

pub use email::EmailChannel;
pub use sms::SmsChannel;
pub use webhook::{FeishuChannel, WeComChannel};

/// Throttle stream shared by every alert at the delivery layer.
pub const NOTIFICATION_STREAM: &str = "notification";

fn default_smtp_server() -> String {
    "smtp.qq.com".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Channel credentials. A channel is active only when all of its fields are
/// present and non-empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub feishu_webhook: Option<String>,
    pub wechat_webhook: Option<String>,
    pub sms_phone: Option<String>,
    pub sms_api_key: Option<String>,
    /// HTTP endpoint that accepts `{"phone","message"}`. Without it SMS alerts
    /// are only logged.
    pub sms_gateway: Option<String>,
    pub email_to: Option<String>,
    pub email_from: Option<String>,
    pub email_password: Option<String>,
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            feishu_webhook: None,
            wechat_webhook: None,
            sms_phone: None,
            sms_api_key: None,
            sms_gateway: None,
            email_to: None,
            email_from: None,
            email_password: None,
            smtp_server: default_smtp_server(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl NotificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn configured_channels(&self) -> Vec<ChannelKind> {
        FanOut::from_config(self)
            .channels
            .iter()
            .filter(|(_, channel)| channel.is_some())
            .map(|(kind, _)| *kind)
            .collect()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Feishu,
    WeCom,
    Sms,
    Email,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelKind::Feishu => "feishu",
            ChannelKind::WeCom => "wecom",
            ChannelKind::Sms => "sms",
            ChannelKind::Email => "email",
        })
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rejected by service: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid address: {0}")]
    Address(String),
    #[error("smtp error: {0}")]
    Smtp(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelOutcome {
    Delivered,
    /// Channel not configured.
    Skipped,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelResult {
    pub channel: ChannelKind,
    pub outcome: ChannelOutcome,
}

impl ChannelResult {
    pub fn delivered(&self) -> bool {
        self.outcome == ChannelOutcome::Delivered
    }
}

pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;
    fn send(&self, message: &str) -> Result<(), ChannelError>;
}

/// Ordered channel list; absent channels keep their slot and report `Skipped`.
pub struct FanOut {
    channels: Vec<(ChannelKind, Option<Box<dyn NotificationChannel>>)>,
}

impl FanOut {
    pub fn from_config(config: &NotificationConfig) -> Self {
        let timeout = config.timeout();
        let feishu = present(&config.feishu_webhook).map(|url| {
            Box::new(FeishuChannel::new(url, timeout)) as Box<dyn NotificationChannel>
        });
        let wecom = present(&config.wechat_webhook).map(|url| {
            Box::new(WeComChannel::new(url, timeout)) as Box<dyn NotificationChannel>
        });
        let sms = match (present(&config.sms_phone), present(&config.sms_api_key)) {
            (Some(phone), Some(api_key)) => Some(Box::new(SmsChannel::new(
                phone,
                api_key,
                present(&config.sms_gateway),
                timeout,
            )) as Box<dyn NotificationChannel>),
            _ => None,
        };
        let email = match (
            present(&config.email_to),
            present(&config.email_from),
            present(&config.email_password),
        ) {
            (Some(to), Some(from), Some(password)) => Some(Box::new(EmailChannel::new(
                to,
                from,
                password,
                &config.smtp_server,
                timeout,
            )) as Box<dyn NotificationChannel>),
            _ => None,
        };

        Self {
            channels: vec![
                (ChannelKind::Feishu, feishu),
                (ChannelKind::WeCom, wecom),
                (ChannelKind::Sms, sms),
                (ChannelKind::Email, email),
            ],
        }
    }

    /// Fan-out over explicit channels, in the given order.
    pub fn with_channels(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self {
            channels: channels
                .into_iter()
                .map(|channel| (channel.kind(), Some(channel)))
                .collect(),
        }
    }

    pub fn dispatch(&self, message: &str) -> Vec<ChannelResult> {
        self.channels
            .iter()
            .map(|(kind, channel)| {
                let outcome = match channel {
                    None => {
                        log::debug!("{} not configured, skipping", kind);
                        ChannelOutcome::Skipped
                    }
                    Some(channel) => match channel.send(message) {
                        Ok(()) => {
                            log::info!("{} notification delivered", kind);
                            ChannelOutcome::Delivered
                        }
                        Err(err) => {
                            log::warn!("{} notification failed: {}", kind, err);
                            ChannelOutcome::Failed(err.to_string())
                        }
                    },
                };
                ChannelResult {
                    channel: *kind,
                    outcome,
                }
            })
            .collect()
    }
}

/// One triggered alert, created by the pipeline and consumed by a sink.
#[derive(Clone, Debug)]
pub struct AlertEvent {
    pub stream: String,
    pub message: String,
    pub raised_at: DateTime<Local>,
    pub person_count: usize,
    pub alert_count: usize,
    pub screenshot: Option<PathBuf>,
}

/// Where the pipeline hands alerts that passed the trigger throttle.
pub trait AlertSink: Send + Sync {
    fn submit(&self, event: AlertEvent);
}

/// Fan-out behind the delivery throttle.
pub struct Notifier {
    fanout: FanOut,
    throttle: AlertThrottle,
}

impl Notifier {
    pub fn new(fanout: FanOut, interval: Duration) -> Self {
        Self {
            fanout,
            throttle: AlertThrottle::new(interval),
        }
    }

    /// Dispatches `event` unless a notification went out less than the
    /// interval ago; returns `None` when suppressed.
    pub fn notify(&self, event: &AlertEvent, now: Instant) -> Option<Vec<ChannelResult>> {
        if !self.throttle.should_fire(NOTIFICATION_STREAM, now) {
            log::info!(
                "notification interval not elapsed ({:?} left), skipping {} alert",
                self.throttle.remaining(NOTIFICATION_STREAM, now),
                event.stream
            );
            return None;
        }

        let rule = "=".repeat(50);
        log::warn!("{}", rule);
        log::warn!("ALERT [{}]", event.stream);
        log::warn!("time: {}", event.raised_at.format("%Y-%m-%d %H:%M:%S"));
        log::warn!("content: {}", event.message);
        log::warn!("{}", rule);

        let results = self.fanout.dispatch(&event.message);
        let delivered = results.iter().filter(|result| result.delivered()).count();
        log::info!(
            "{} alert dispatched: {}/{} channels delivered",
            event.stream,
            delivered,
            results.len()
        );
        Some(results)
    }
}

/// Synchronous delivery, for single-threaded runs.
impl AlertSink for Notifier {
    fn submit(&self, event: AlertEvent) {
        self.notify(&event, Instant::now());
    }
}

/// Counters kept by `AlertDispatcher`.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub dispatched: AtomicU64,
    pub suppressed: AtomicU64,
    pub dropped: AtomicU64,
}

impl DispatchStats {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Runs a `Notifier` on a dedicated thread fed by a bounded queue.
///
/// Alerts are processed one at a time in submission order. When the queue is
/// full the new alert is dropped and counted. Dropping or `shutdown` closes
/// the queue and joins the worker after it drains.
pub struct AlertDispatcher {
    sender: Mutex<Option<SyncSender<AlertEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<DispatchStats>,
}

impl AlertDispatcher {
    pub fn spawn(notifier: Notifier, queue: usize) -> anyhow::Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(queue.max(1));
        let stats = Arc::new(DispatchStats::default());
        let worker_stats = stats.clone();
        let worker = thread::Builder::new()
            .name("vigil-notify".to_string())
            .spawn(move || run_dispatcher(notifier, receiver, worker_stats))?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            stats,
        })
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("notification worker panicked");
            }
        }
    }
}

impl AlertSink for AlertDispatcher {
    fn submit(&self, event: AlertEvent) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = sender.as_ref() else {
            log::warn!("notification dispatcher stopped, dropping {} alert", event.stream);
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("notification queue full, dropping {} alert", event.stream);
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Disconnected(event)) => {
                log::error!("notification worker gone, dropping {} alert", event.stream);
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_dispatcher(notifier: Notifier, receiver: Receiver<AlertEvent>, stats: Arc<DispatchStats>) {
    for event in receiver {
        match notifier.notify(&event, Instant::now()) {
            Some(_) => stats.dispatched.fetch_add(1, Ordering::SeqCst),
            None => stats.suppressed.fetch_add(1, Ordering::SeqCst),
        };
    }
    log::info!("notification dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct MockChannel {
        kind: ChannelKind,
        fail: bool,
        sent: Arc<AtomicUsize>,
    }

    impl MockChannel {
        fn boxed(
            kind: ChannelKind,
            fail: bool,
            sent: &Arc<AtomicUsize>,
        ) -> Box<dyn NotificationChannel> {
            Box::new(Self {
                kind,
                fail,
                sent: sent.clone(),
            })
        }
    }

    impl NotificationChannel for MockChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn send(&self, _message: &str) -> Result<(), ChannelError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ChannelError::Transport("timed out".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn event(stream: &str) -> AlertEvent {
        AlertEvent {
            stream: stream.to_string(),
            message: "[Fall detection alert] test".to_string(),
            raised_at: Local::now(),
            person_count: 1,
            alert_count: 1,
            screenshot: None,
        }
    }

    #[test]
    fn failing_channel_does_not_block_the_rest() {
        let sent = Arc::new(AtomicUsize::new(0));
        let fanout = FanOut::with_channels(vec![
            MockChannel::boxed(ChannelKind::Feishu, true, &sent),
            MockChannel::boxed(ChannelKind::WeCom, false, &sent),
            MockChannel::boxed(ChannelKind::Sms, false, &sent),
            MockChannel::boxed(ChannelKind::Email, false, &sent),
        ]);

        let results = fanout.dispatch("hello");
        assert_eq!(sent.load(Ordering::SeqCst), 4);
        assert!(matches!(results[0].outcome, ChannelOutcome::Failed(_)));
        assert!(results[1..].iter().all(ChannelResult::delivered));
        assert_eq!(
            results.iter().map(|r| r.channel).collect::<Vec<_>>(),
            vec![
                ChannelKind::Feishu,
                ChannelKind::WeCom,
                ChannelKind::Sms,
                ChannelKind::Email
            ]
        );
    }

    #[test]
    fn empty_config_skips_every_channel() {
        let config = NotificationConfig {
            sms_phone: Some("13800000000".to_string()),
            feishu_webhook: Some("  ".to_string()),
            ..NotificationConfig::default()
        };
        assert!(config.configured_channels().is_empty());
        let results = FanOut::from_config(&config).dispatch("hello");
        assert_eq!(results.len(), 4);
        assert!(results
            .iter()
            .all(|result| result.outcome == ChannelOutcome::Skipped));
    }

    #[test]
    fn config_activates_complete_channels_only() {
        let config = NotificationConfig {
            wechat_webhook: Some("http://127.0.0.1:9/hook".to_string()),
            sms_phone: Some("13800000000".to_string()),
            sms_api_key: Some("key".to_string()),
            email_to: Some("ops@example.com".to_string()),
            ..NotificationConfig::default()
        };
        assert_eq!(
            config.configured_channels(),
            vec![ChannelKind::WeCom, ChannelKind::Sms]
        );
        assert_eq!(config.smtp_server, "smtp.qq.com");
    }

    #[test]
    fn notifier_suppresses_inside_interval() {
        let sent = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::new(
            FanOut::with_channels(vec![MockChannel::boxed(ChannelKind::Feishu, false, &sent)]),
            Duration::from_secs(300),
        );
        let start = Instant::now();

        assert!(notifier.notify(&event("fall"), start).is_some());
        assert!(notifier
            .notify(&event("presence"), start + Duration::from_secs(120))
            .is_none());
        assert!(notifier
            .notify(&event("fall"), start + Duration::from_secs(300))
            .is_some());
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dispatcher_drains_queue_on_shutdown() -> anyhow::Result<()> {
        let sent = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::new(
            FanOut::with_channels(vec![MockChannel::boxed(ChannelKind::WeCom, false, &sent)]),
            Duration::from_secs(300),
        );
        let dispatcher = AlertDispatcher::spawn(notifier, 8)?;
        let stats = dispatcher.stats();

        dispatcher.submit(event("fall"));
        dispatcher.submit(event("fall"));
        dispatcher.shutdown();

        assert_eq!(stats.dispatched(), 1);
        assert_eq!(stats.suppressed(), 1);
        assert_eq!(sent.load(Ordering::SeqCst), 1);

        dispatcher.submit(event("fall"));
        assert_eq!(stats.dropped(), 1);
        Ok(())
    }
}

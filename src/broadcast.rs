//! Live telemetry fan-out to connected viewers.
//!
//! Every subscriber owns a bounded queue. `publish` serializes the message
//! once, then does non-blocking sends over a snapshot of the subscriber set;
//! a subscriber whose queue is full (too slow) or whose receiver is gone
//! (disconnected) is removed in the same call. The capture loop never waits
//! on a viewer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Detection summary of one processed frame.
#[derive(Clone, Debug)]
pub struct FrameSummary {
    pub sequence: u64,
    pub person_count: usize,
    pub alert_count: usize,
    pub timestamp: DateTime<Local>,
}

impl FrameSummary {
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Wire message sent to viewers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TelemetryMessage {
    Video {
        /// Base64 JPEG.
        frame: String,
        person_count: usize,
        timestamp: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub removed: Vec<u64>,
}

pub struct Subscription {
    id: u64,
    receiver: Receiver<Arc<str>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next serialized message; `Disconnected` once the broadcaster has
    /// dropped this subscriber.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<str>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<Arc<str>> {
        self.receiver.try_recv().ok()
    }
}

pub struct Broadcaster {
    queue_capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, SyncSender<Arc<str>>>>,
    latest: Mutex<Option<FrameSummary>>,
}

impl Broadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            latest: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::sync_channel(self.queue_capacity);
        let count = {
            let mut subscribers = self.lock_subscribers();
            subscribers.insert(id, sender);
            subscribers.len()
        };
        log::info!("viewer {} subscribed ({} connected)", id, count);
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.lock_subscribers().remove(&id).is_some();
        if removed {
            log::info!("viewer {} unsubscribed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    /// Sends one encoded JPEG frame and its summary to every subscriber.
    pub fn publish(&self, jpeg: &[u8], summary: &FrameSummary) -> PublishReport {
        self.record_summary(summary);
        let message = TelemetryMessage::Video {
            frame: BASE64.encode(jpeg),
            person_count: summary.person_count,
            timestamp: summary.timestamp_string(),
        };
        let payload: Arc<str> = match serde_json::to_string(&message) {
            Ok(payload) => payload.into(),
            Err(err) => {
                log::warn!("failed to serialize telemetry frame: {}", err);
                return PublishReport::default();
            }
        };

        let snapshot: Vec<(u64, SyncSender<Arc<str>>)> = self
            .lock_subscribers()
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        let mut report = PublishReport::default();
        for (id, sender) in snapshot {
            match sender.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::info!("viewer {} is too slow, dropping it", id);
                    report.removed.push(id);
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::info!("viewer {} disconnected", id);
                    report.removed.push(id);
                }
            }
        }

        if !report.removed.is_empty() {
            let mut subscribers = self.lock_subscribers();
            for id in &report.removed {
                subscribers.remove(id);
            }
        }
        report
    }

    /// Updates the latest summary without broadcasting a frame.
    pub fn record_summary(&self, summary: &FrameSummary) {
        *self
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(summary.clone());
    }

    pub fn latest_summary(&self) -> Option<FrameSummary> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SyncSender<Arc<str>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn summary(person_count: usize) -> FrameSummary {
        FrameSummary {
            sequence: 1,
            person_count,
            alert_count: person_count,
            timestamp: Local::now(),
        }
    }

    #[test]
    fn disconnected_subscriber_is_removed_others_still_receive() {
        let broadcaster = Broadcaster::new(4);
        let first = broadcaster.subscribe();
        let second = broadcaster.subscribe();
        let third = broadcaster.subscribe();
        let second_id = second.id();
        drop(second);

        let report = broadcaster.publish(&[0xFF, 0xD8, 0xFF, 0xD9], &summary(2));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, vec![second_id]);
        assert_eq!(broadcaster.subscriber_count(), 2);

        for subscription in [&first, &third] {
            let payload = subscription.try_recv().unwrap();
            let message: Value = serde_json::from_str(&payload).unwrap();
            assert_eq!(message["type"], "video");
            assert_eq!(message["frame"], "/9j/2Q==");
            assert_eq!(message["person_count"], 2);
            assert!(message["timestamp"].is_string());
        }
    }

    #[test]
    fn slow_subscriber_is_dropped_when_queue_is_full() {
        let broadcaster = Broadcaster::new(1);
        let slow = broadcaster.subscribe();
        let fast = broadcaster.subscribe();

        broadcaster.publish(b"a", &summary(0));
        assert!(fast.try_recv().is_some());
        let report = broadcaster.publish(b"b", &summary(0));

        assert_eq!(report.removed, vec![slow.id()]);
        assert_eq!(report.delivered, 1);
        assert!(slow.try_recv().is_some());
        assert!(matches!(
            slow.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn keeps_latest_summary_and_supports_unsubscribe() {
        let broadcaster = Broadcaster::new(2);
        assert!(broadcaster.latest_summary().is_none());
        let subscription = broadcaster.subscribe();
        broadcaster.publish(b"x", &summary(3));
        assert_eq!(broadcaster.latest_summary().unwrap().person_count, 3);

        assert!(broadcaster.unsubscribe(subscription.id()));
        assert!(!broadcaster.unsubscribe(subscription.id()));
        assert_eq!(broadcaster.publish(b"y", &summary(1)).delivered, 0);
    }
}

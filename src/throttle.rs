use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimum-interval gate, independent per named stream.
///
/// `should_fire` is a single check-and-record step under one lock, so two
/// callers racing on the same stream at the same instant cannot both pass.
/// The first call for a stream always fires.
#[derive(Debug)]
pub struct AlertThrottle {
    interval: Duration,
    last_fire: Mutex<HashMap<String, Instant>>,
}

impl AlertThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true, and records `now` as the stream's last fire time, when at
    /// least `interval` has elapsed since the previous fire.
    pub fn should_fire(&self, stream: &str, now: Instant) -> bool {
        let mut last_fire = self
            .last_fire
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = last_fire.get(stream) {
            if now.saturating_duration_since(*previous) < self.interval {
                return false;
            }
        }
        last_fire.insert(stream.to_string(), now);
        true
    }

    /// Time left before `stream` may fire again.
    pub fn remaining(&self, stream: &str, now: Instant) -> Duration {
        let last_fire = self
            .last_fire
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match last_fire.get(stream) {
            Some(previous) => self
                .interval
                .saturating_sub(now.saturating_duration_since(*previous)),
            None => Duration::ZERO,
        }
    }

    pub fn reset(&self, stream: &str) {
        let mut last_fire = self
            .last_fire
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        last_fire.remove(stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_secs(60);

    #[test]
    fn second_call_inside_interval_is_blocked() {
        let throttle = AlertThrottle::new(INTERVAL);
        let start = Instant::now();
        for gap in [Duration::ZERO, Duration::from_secs(10), Duration::from_millis(59_999)] {
            throttle.reset("fall");
            assert!(throttle.should_fire("fall", start));
            assert!(!throttle.should_fire("fall", start + gap), "gap {:?}", gap);
        }
    }

    #[test]
    fn second_call_after_interval_fires() {
        let throttle = AlertThrottle::new(INTERVAL);
        let start = Instant::now();
        for gap in [INTERVAL, INTERVAL + Duration::from_millis(1), INTERVAL * 5] {
            throttle.reset("fall");
            assert!(throttle.should_fire("fall", start));
            assert!(throttle.should_fire("fall", start + gap), "gap {:?}", gap);
        }
    }

    #[test]
    fn blocked_calls_do_not_extend_the_window() {
        let throttle = AlertThrottle::new(INTERVAL);
        let start = Instant::now();
        assert!(throttle.should_fire("presence", start));
        assert!(!throttle.should_fire("presence", start + Duration::from_secs(30)));
        assert!(throttle.should_fire("presence", start + INTERVAL));
    }

    #[test]
    fn streams_are_independent() {
        let throttle = AlertThrottle::new(INTERVAL);
        let now = Instant::now();
        assert!(throttle.should_fire("presence", now));
        assert!(throttle.should_fire("fall", now));
        assert!(!throttle.should_fire("presence", now));
        assert_eq!(throttle.remaining("presence", now), INTERVAL);
        assert_eq!(throttle.remaining("unknown", now), Duration::ZERO);
    }

    #[test]
    fn concurrent_callers_pass_the_gate_once() {
        let throttle = Arc::new(AlertThrottle::new(INTERVAL));
        let fired = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let throttle = throttle.clone();
                let fired = fired.clone();
                std::thread::spawn(move || {
                    if throttle.should_fire("fall", now) {
                        fired.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}

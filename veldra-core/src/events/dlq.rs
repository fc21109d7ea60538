//! Dead-letter queue for events whose handlers failed.

use crate::events::error::EventError;
use crate::events::event::Event;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Default maximum number of retained failures.
pub const DEFAULT_DLQ_MAX_SIZE: usize = 1000;

/// A dispatched event together with the subscription that failed on it.
#[derive(Debug, Clone)]
pub struct FailedEvent {
    /// The event that was being dispatched.
    pub event: Event,
    /// Id of the subscription whose handler failed.
    pub subscription_id: String,
    /// The handler's reported error.
    pub error: EventError,
    /// Milliseconds since the Unix epoch when the failure was recorded.
    pub failed_at: i64,
}

/// Bounded FIFO buffer of handler failures.
///
/// When a handler fails, the event and the failing subscription id are
/// retained here for inspection or replay. At capacity the oldest entry is
/// evicted; the total-failed counter keeps counting past evictions and
/// clears.
#[derive(Debug)]
pub struct DeadLetterQueue {
    queue: Mutex<VecDeque<FailedEvent>>,
    max_size: usize,
    total_failed: AtomicU64,
}

impl DeadLetterQueue {
    /// Create a queue bounded to `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            max_size,
            total_failed: AtomicU64::new(0),
        }
    }

    /// Record a handler failure, evicting the oldest entry at capacity.
    pub fn push(&self, event: Event, subscription_id: &str, error: EventError) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.max_size {
            if let Some(evicted) = queue.pop_front() {
                warn!(
                    event_type = %evicted.event.event_type(),
                    "dead-letter queue full, evicting oldest entry"
                );
            }
        }

        warn!(
            event_type = %event.event_type(),
            subscription = subscription_id,
            error = %error,
            "event added to dead-letter queue"
        );

        queue.push_back(FailedEvent {
            event,
            subscription_id: subscription_id.to_string(),
            error,
            failed_at: Utc::now().timestamp_millis(),
        });
        self.total_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current number of retained failures.
    pub fn size(&self) -> usize {
        self.queue.lock().len()
    }

    /// Total failures ever recorded, including evicted and cleared entries.
    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    /// Remove and return the oldest failure, if any.
    pub fn poll(&self) -> Option<FailedEvent> {
        self.queue.lock().pop_front()
    }

    /// Snapshot of the retained failures, oldest first.
    pub fn snapshot(&self) -> Vec<FailedEvent> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Drop all retained failures.
    pub fn clear(&self) {
        let mut queue = self.queue.lock();
        let cleared = queue.len();
        queue.clear();
        info!(cleared, "cleared dead-letter queue");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(n: u32) -> (Event, EventError) {
        (Event::new(format!("T{n}"), "test"), EventError::new("boom"))
    }

    #[test]
    fn capacity_plus_one_evicts_oldest() {
        let dlq = DeadLetterQueue::new(3);
        for n in 0..4 {
            let (event, error) = failed(n);
            dlq.push(event, "sub-1", error);
        }

        assert_eq!(dlq.size(), 3);
        assert_eq!(dlq.total_failed(), 4);
        let oldest = dlq.poll().expect("entry");
        assert_eq!(oldest.event.event_type(), "T1");
    }

    #[test]
    fn clear_keeps_total_count() {
        let dlq = DeadLetterQueue::new(10);
        let (event, error) = failed(0);
        dlq.push(event, "sub-1", error);
        dlq.clear();

        assert_eq!(dlq.size(), 0);
        assert_eq!(dlq.total_failed(), 1);
    }

    #[test]
    fn snapshot_is_oldest_first() {
        let dlq = DeadLetterQueue::new(10);
        for n in 0..3 {
            let (event, error) = failed(n);
            dlq.push(event, "sub-1", error);
        }
        let entries = dlq.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].event.event_type(), "T0");
        assert_eq!(entries[2].event.event_type(), "T2");
    }
}

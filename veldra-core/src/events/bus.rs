//! Type-keyed publish/subscribe bus with asynchronous dispatch.

use crate::events::dlq::{DeadLetterQueue, FailedEvent, DEFAULT_DLQ_MAX_SIZE};
use crate::events::error::EventResult;
use crate::events::event::Event;
use crate::events::persistence::EventPersistence;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Subscription type filter matching every event.
pub const WILDCARD: &str = "*";

/// Receiver side of a subscription.
///
/// Handlers are invoked asynchronously, each dispatch on its own task, so a
/// slow handler never stalls other subscribers. A returned error sends the
/// event to the dead-letter queue; the publisher is never affected.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a single event.
    async fn handle_event(&self, event: &Event) -> EventResult<()>;
}

#[derive(Clone)]
struct Subscription {
    id: String,
    event_type: String,
    handler: Arc<dyn EventHandler>,
}

/// Publish/subscribe event bus with wildcard subscriptions, a bounded
/// dead-letter queue, and an append-only on-disk replay log.
///
/// Publication persists the event first (best effort), then dispatches a
/// snapshot of the matching subscriptions. Dispatch order across subscribers
/// is unspecified.
pub struct EventBus {
    /// Exact-type subscriptions, snapshot-cloned on every publish.
    by_type: DashMap<String, Vec<Subscription>>,
    /// Wildcard subscriptions; guarded by a dedicated mutex because the
    /// list is iterated on every publish.
    wildcard: Mutex<Vec<Subscription>>,
    /// Subscription id lookup for unsubscribe.
    by_id: DashMap<String, Subscription>,
    next_id: AtomicU64,
    dlq: Arc<DeadLetterQueue>,
    persistence: EventPersistence,
}

impl EventBus {
    /// Create a bus persisting under `base_dir` with the default DLQ bound.
    pub fn new(base_dir: &Path) -> Self {
        Self::with_dlq_size(base_dir, DEFAULT_DLQ_MAX_SIZE)
    }

    /// Create a bus with an explicit dead-letter queue bound.
    pub fn with_dlq_size(base_dir: &Path, dlq_max_size: usize) -> Self {
        info!(dlq_max_size, "event bus initialized");
        Self {
            by_type: DashMap::new(),
            wildcard: Mutex::new(Vec::new()),
            by_id: DashMap::new(),
            next_id: AtomicU64::new(0),
            dlq: Arc::new(DeadLetterQueue::new(dlq_max_size)),
            persistence: EventPersistence::new(base_dir),
        }
    }

    /// Publish an event to all matching subscribers.
    ///
    /// The event is appended to the persistence log before any handler can
    /// observe it; a persistence failure is logged and does not block
    /// dispatch. Must be called from within a tokio runtime.
    pub fn publish(&self, event: Event) {
        self.persistence.persist(&event);

        debug!(
            event_type = %event.event_type(),
            source = %event.source(),
            timestamp = event.timestamp(),
            "publishing event"
        );

        let event = Arc::new(event);

        let typed: Vec<Subscription> = self
            .by_type
            .get(event.event_type())
            .map(|subs| subs.clone())
            .unwrap_or_default();
        for subscription in typed {
            self.dispatch(Arc::clone(&event), subscription);
        }

        let wildcards: Vec<Subscription> = self.wildcard.lock().clone();
        for subscription in wildcards {
            self.dispatch(Arc::clone(&event), subscription);
        }
    }

    fn dispatch(&self, event: Arc<Event>, subscription: Subscription) {
        let dlq = Arc::clone(&self.dlq);
        tokio::spawn(async move {
            match subscription.handler.handle_event(&event).await {
                Ok(()) => trace!(
                    event_type = %event.event_type(),
                    subscription = %subscription.id,
                    "event handled"
                ),
                Err(err) => {
                    dlq.push((*event).clone(), &subscription.id, err);
                },
            }
        });
    }

    /// Subscribe to events of an exact type (or [`WILDCARD`] for all).
    ///
    /// Returns the subscription id used to unsubscribe.
    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> String {
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let subscription = Subscription {
            id: id.clone(),
            event_type: event_type.to_string(),
            handler,
        };

        if event_type == WILDCARD {
            self.wildcard.lock().push(subscription.clone());
        } else {
            self.by_type.entry(event_type.to_string()).or_default().push(subscription.clone());
        }
        self.by_id.insert(id.clone(), subscription);

        info!(event_type, subscription = %id, "subscribed");
        id
    }

    /// Subscribe to every event published on the bus.
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> String {
        self.subscribe(WILDCARD, handler)
    }

    /// Remove a subscription. Unknown ids log a warning and do nothing.
    pub fn unsubscribe(&self, subscription_id: &str) {
        let Some((_, subscription)) = self.by_id.remove(subscription_id) else {
            warn!(subscription = subscription_id, "subscription not found");
            return;
        };

        if subscription.event_type == WILDCARD {
            self.wildcard.lock().retain(|s| s.id != subscription_id);
        } else if let Some(mut subs) = self.by_type.get_mut(&subscription.event_type) {
            subs.retain(|s| s.id != subscription_id);
            let empty = subs.is_empty();
            drop(subs);
            if empty {
                self.by_type.remove_if(&subscription.event_type, |_, subs| subs.is_empty());
            }
        }

        info!(subscription = subscription_id, "unsubscribed");
    }

    /// Number of active subscriptions, wildcard included.
    pub fn subscription_count(&self) -> usize {
        let typed: usize = self.by_type.iter().map(|subs| subs.len()).sum();
        typed + self.wildcard.lock().len()
    }

    /// Re-publish persisted events, oldest first.
    ///
    /// `event_type` of `None` replays everything; `limit` of 0 is unbounded.
    /// Replayed events go through the normal publish path and are persisted
    /// again. Returns the number of events replayed.
    pub fn replay(&self, event_type: Option<&str>, limit: usize) -> usize {
        let cap = if limit == 0 { usize::MAX } else { limit };
        let mut replayed = 0;

        for event in self.persistence.load(0) {
            if replayed >= cap {
                break;
            }
            if let Some(filter) = event_type {
                if event.event_type() != filter {
                    continue;
                }
            }
            self.publish(event);
            replayed += 1;
        }

        info!(replayed, filter = event_type.unwrap_or(WILDCARD), "replayed persisted events");
        replayed
    }

    /// Number of failures currently retained in the dead-letter queue.
    pub fn dlq_size(&self) -> usize {
        self.dlq.size()
    }

    /// Total handler failures ever recorded, surviving eviction and clear.
    pub fn total_failed(&self) -> u64 {
        self.dlq.total_failed()
    }

    /// Snapshot of the retained failures, oldest first.
    pub fn failed_events(&self) -> Vec<FailedEvent> {
        self.dlq.snapshot()
    }

    /// Re-publish events from the dead-letter queue, oldest first.
    ///
    /// Replayed entries leave the queue. `limit` of 0 is unbounded. Returns
    /// the number of events replayed.
    pub fn replay_failed(&self, limit: usize) -> usize {
        let cap = if limit == 0 { usize::MAX } else { limit };
        let mut replayed = 0;

        while replayed < cap {
            let Some(failed) = self.dlq.poll() else { break };
            self.publish(failed.event);
            replayed += 1;
        }

        info!(replayed, "replayed failed events");
        replayed
    }

    /// Drop every entry from the dead-letter queue.
    pub fn clear_dlq(&self) {
        self.dlq.clear();
    }

    /// Access to the on-disk event log.
    pub fn persistence(&self) -> &EventPersistence {
        &self.persistence
    }

    /// Shut the bus down.
    ///
    /// In-flight handler tasks are detached and not awaited; nothing new is
    /// dispatched only because the owning host stops publishing.
    pub fn shutdown(&self) {
        info!("event bus shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::error::EventError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Counting {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle_event(&self, _event: &Event) -> EventResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle_event(&self, _event: &Event) -> EventResult<()> {
            Err(EventError::new("handler exploded"))
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn typed_and_wildcard_subscribers_both_receive() {
        let dir = TempDir::new().expect("temp dir");
        let bus = EventBus::new(dir.path());

        let typed = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));
        bus.subscribe("T", Arc::new(Counting { count: Arc::clone(&typed) }));
        bus.subscribe_all(Arc::new(Counting { count: Arc::clone(&all) }));

        bus.publish(Event::new("T", "test"));
        bus.publish(Event::new("other", "test"));

        wait_until(|| typed.load(Ordering::SeqCst) == 1 && all.load(Ordering::SeqCst) == 2).await;
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let dir = TempDir::new().expect("temp dir");
        let bus = EventBus::new(dir.path());

        let count = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe("T", Arc::new(Counting { count: Arc::clone(&count) }));
        assert_eq!(bus.subscription_count(), 1);

        bus.unsubscribe(&id);
        bus.unsubscribe(&id);
        bus.unsubscribe("sub-999");
        assert_eq!(bus.subscription_count(), 0);

        bus.publish(Event::new("T", "test"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subscription_ids_are_unique_and_monotonic() {
        let dir = TempDir::new().expect("temp dir");
        let bus = EventBus::new(dir.path());

        let a = bus.subscribe("T", Arc::new(Failing));
        let b = bus.subscribe_all(Arc::new(Failing));
        assert_eq!(a, "sub-1");
        assert_eq!(b, "sub-2");
    }

    #[tokio::test]
    async fn failing_handler_lands_in_dlq() {
        let dir = TempDir::new().expect("temp dir");
        let bus = EventBus::new(dir.path());
        let id = bus.subscribe("T", Arc::new(Failing));

        bus.publish(Event::new("T", "test"));

        wait_until(|| bus.dlq_size() == 1).await;
        assert_eq!(bus.total_failed(), 1);
        let failed = &bus.failed_events()[0];
        assert_eq!(failed.subscription_id, id);
        assert_eq!(failed.event.event_type(), "T");
    }

    #[tokio::test]
    async fn persistence_happens_before_dispatch() {
        let dir = TempDir::new().expect("temp dir");
        let bus = EventBus::new(dir.path());

        bus.publish(Event::new("T", "test"));
        // No subscribers, yet the event is on disk.
        assert_eq!(bus.persistence().count(), 1);
    }
}

//! A plugin that watches the whole platform through the context services.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use veldra_core::events::{Event, EventHandler, EventResult};
use veldra_core::plugin::{Plugin, PluginContext, PluginError, PluginResult, PluginState};

const PLUGIN_NAME: &str = "observability-plugin";
const PLUGIN_VERSION: &str = "1.0.0";
const DEFAULT_INTERVAL_MS: u64 = 10_000;

struct EventCounter {
    seen: Arc<AtomicU64>,
}

#[async_trait]
impl EventHandler for EventCounter {
    async fn handle_event(&self, event: &Event) -> EventResult<()> {
        self.seen.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_type = %event.event_type(),
            source = %event.source(),
            "observability plugin saw event"
        );
        Ok(())
    }
}

/// Subscribes to every event on the bus and periodically logs a platform
/// metrics snapshot.
///
/// Demonstrates reaching the event bus and the metrics sink through the
/// plugin context service accessors.
pub struct ObservabilityPlugin {
    state: PluginState,
    context: Option<PluginContext>,
    subscription: Option<String>,
    collector: Option<JoinHandle<()>>,
    events_seen: Arc<AtomicU64>,
    interval: Duration,
}

impl ObservabilityPlugin {
    /// Create a plugin instance awaiting initialization.
    pub fn new() -> Self {
        Self {
            state: PluginState::Loaded,
            context: None,
            subscription: None,
            collector: None,
            events_seen: Arc::new(AtomicU64::new(0)),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
        }
    }

    /// Number of events observed since the last start.
    pub fn events_seen(&self) -> u64 {
        self.events_seen.load(Ordering::Relaxed)
    }

    fn teardown(&mut self) {
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
        let subscription = self.subscription.take();
        if let (Some(context), Some(subscription)) = (&self.context, subscription) {
            context.event_bus().unsubscribe(&subscription);
        }
    }
}

impl Default for ObservabilityPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ObservabilityPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        PLUGIN_VERSION
    }

    async fn init(&mut self, context: PluginContext) -> PluginResult<()> {
        self.interval = Duration::from_millis(
            context
                .config("metrics-interval-ms")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_INTERVAL_MS),
        );

        context.span().in_scope(|| {
            info!(
                version = PLUGIN_VERSION,
                interval_ms = self.interval.as_millis() as u64,
                "observability plugin initialized"
            );
        });

        self.context = Some(context);
        self.state = PluginState::Initialized;
        Ok(())
    }

    async fn start(&mut self) -> PluginResult<()> {
        if !self.state.is_startable() {
            return Err(PluginError::new(format!(
                "observability plugin must be initialized or stopped before starting, current: {}",
                self.state
            )));
        }
        let Some(context) = self.context.clone() else {
            return Err(PluginError::new("observability plugin has no context"));
        };

        self.events_seen.store(0, Ordering::Relaxed);
        let counter = EventCounter { seen: Arc::clone(&self.events_seen) };
        self.subscription = Some(context.event_bus().subscribe_all(Arc::new(counter)));

        let metrics = context.metrics();
        let events_seen = Arc::clone(&self.events_seen);
        let span = context.span();
        let interval = self.interval;
        self.collector = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = metrics.snapshot();
                span.in_scope(|| {
                    info!(
                        installed = snapshot.installed,
                        started = snapshot.started,
                        stopped = snapshot.stopped,
                        errors = snapshot.errors,
                        events_seen = events_seen.load(Ordering::Relaxed),
                        uptime_ms = snapshot.uptime_ms,
                        "platform metrics"
                    );
                });
            }
        }));

        self.state = PluginState::Started;
        Ok(())
    }

    async fn stop(&mut self) -> PluginResult<()> {
        if self.state != PluginState::Started {
            return Err(PluginError::new(format!(
                "observability plugin must be started before stopping, current: {}",
                self.state
            )));
        }

        self.teardown();
        self.state = PluginState::Stopped;
        Ok(())
    }

    async fn destroy(&mut self) {
        self.teardown();
        self.context = None;
        self.state = PluginState::Unloaded;
    }

    fn state(&self) -> PluginState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_requires_initialization() {
        let mut plugin = ObservabilityPlugin::new();
        assert!(plugin.start().await.is_err());
        assert_eq!(plugin.state(), PluginState::Loaded);
    }

    #[tokio::test]
    async fn destroy_without_start_is_safe() {
        let mut plugin = ObservabilityPlugin::new();
        plugin.destroy().await;
        assert_eq!(plugin.state(), PluginState::Unloaded);
        assert_eq!(plugin.events_seen(), 0);
    }
}

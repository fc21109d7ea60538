//! A minimal plugin demonstrating the lifecycle contract.

use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use veldra_core::plugin::{Plugin, PluginContext, PluginError, PluginResult, PluginState};

const PLUGIN_NAME: &str = "heartbeat-plugin";
const PLUGIN_VERSION: &str = "1.0.0";
const DEFAULT_INTERVAL_MS: u64 = 5000;

/// Logs a configurable greeting and then a periodic heartbeat while
/// started.
///
/// Demonstrates configuration access through the context, the plugin
/// logging span, and a background task tied to `start`/`stop`.
pub struct HeartbeatPlugin {
    state: PluginState,
    context: Option<PluginContext>,
    greeting: String,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatPlugin {
    /// Create a plugin instance awaiting initialization.
    pub fn new() -> Self {
        Self {
            state: PluginState::Loaded,
            context: None,
            greeting: String::new(),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            task: None,
        }
    }

    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Default for HeartbeatPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for HeartbeatPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        PLUGIN_VERSION
    }

    async fn init(&mut self, context: PluginContext) -> PluginResult<()> {
        self.greeting = context.config_or("greeting", "Hello from the heartbeat plugin");
        self.interval = Duration::from_millis(
            context
                .config("heartbeat-interval-ms")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_INTERVAL_MS),
        );

        context.span().in_scope(|| {
            info!(
                version = PLUGIN_VERSION,
                greeting = %self.greeting,
                interval_ms = self.interval.as_millis() as u64,
                "heartbeat plugin initialized"
            );
        });

        self.context = Some(context);
        self.state = PluginState::Initialized;
        Ok(())
    }

    async fn start(&mut self) -> PluginResult<()> {
        if !self.state.is_startable() {
            return Err(PluginError::new(format!(
                "heartbeat plugin must be initialized or stopped before starting, current: {}",
                self.state
            )));
        }
        let Some(context) = self.context.clone() else {
            return Err(PluginError::new("heartbeat plugin has no context"));
        };

        let greeting = self.greeting.clone();
        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            let span = context.span();
            let mut ticker = tokio::time::interval(interval);
            let mut beats: u64 = 0;
            loop {
                ticker.tick().await;
                beats += 1;
                span.in_scope(|| info!(beats, greeting = %greeting, "heartbeat"));
            }
        }));

        self.state = PluginState::Started;
        Ok(())
    }

    async fn stop(&mut self) -> PluginResult<()> {
        if self.state != PluginState::Started {
            return Err(PluginError::new(format!(
                "heartbeat plugin must be started before stopping, current: {}",
                self.state
            )));
        }

        self.stop_task();
        self.state = PluginState::Stopped;
        Ok(())
    }

    async fn destroy(&mut self) {
        self.stop_task();
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
        let mut plugin = HeartbeatPlugin::new();
        assert!(plugin.start().await.is_err());
        assert_eq!(plugin.state(), PluginState::Loaded);
    }

    #[tokio::test]
    async fn stop_requires_started() {
        let mut plugin = HeartbeatPlugin::new();
        assert!(plugin.stop().await.is_err());
    }

    #[tokio::test]
    async fn destroy_is_always_safe() {
        let mut plugin = HeartbeatPlugin::new();
        plugin.destroy().await;
        assert_eq!(plugin.state(), PluginState::Unloaded);
    }
}

//! Shared fixtures: a scriptable test plugin and a wired service stack.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use veldra_core::config::{ConfigSettings, ConfigStore};
use veldra_core::events::{Event, EventBus, EventHandler, EventResult};
use veldra_core::healing::{Supervisor, SupervisorConfig};
use veldra_core::metrics::MetricsSink;
use veldra_core::plugin::{
    ArtifactDefinition, Plugin, PluginContext, PluginError, PluginLoader, PluginRegistry,
    PluginResult, PluginState, StaticPluginLoader,
};

/// Observation point shared between a test and the plugin instances the
/// loader constructs for it.
#[derive(Default)]
pub struct PluginProbe {
    pub init_calls: AtomicU32,
    pub start_calls: AtomicU32,
    pub stop_calls: AtomicU32,
    pub destroy_calls: AtomicU32,
    /// Remaining scripted failures per operation.
    pub init_failures: AtomicU32,
    pub start_failures: AtomicU32,
    pub stop_failures: AtomicU32,
    /// The `mode` config value seen at each init.
    pub init_modes: Mutex<Vec<Option<String>>>,
}

impl PluginProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_starts(&self, count: u32) {
        self.start_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_inits(&self, count: u32) {
        self.init_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_stops(&self, count: u32) {
        self.stop_failures.store(count, Ordering::SeqCst);
    }

    pub fn init_modes(&self) -> Vec<Option<String>> {
        self.init_modes.lock().clone()
    }

    fn consume_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A plugin whose lifecycle behavior is scripted through its probe.
pub struct TestPlugin {
    probe: Arc<PluginProbe>,
    state: PluginState,
}

impl TestPlugin {
    pub fn new(probe: Arc<PluginProbe>) -> Self {
        Self { probe, state: PluginState::Loaded }
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        "test-plugin"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn init(&mut self, context: PluginContext) -> PluginResult<()> {
        self.probe.init_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.init_modes.lock().push(context.config("mode"));
        if PluginProbe::consume_failure(&self.probe.init_failures) {
            return Err(PluginError::new("scripted init failure"));
        }
        self.state = PluginState::Initialized;
        Ok(())
    }

    async fn start(&mut self) -> PluginResult<()> {
        self.probe.start_calls.fetch_add(1, Ordering::SeqCst);
        if PluginProbe::consume_failure(&self.probe.start_failures) {
            return Err(PluginError::new("scripted start failure"));
        }
        self.state = PluginState::Started;
        Ok(())
    }

    async fn stop(&mut self) -> PluginResult<()> {
        self.probe.stop_calls.fetch_add(1, Ordering::SeqCst);
        if PluginProbe::consume_failure(&self.probe.stop_failures) {
            return Err(PluginError::new("scripted stop failure"));
        }
        self.state = PluginState::Stopped;
        Ok(())
    }

    async fn destroy(&mut self) {
        self.probe.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.state = PluginState::Unloaded;
    }

    fn state(&self) -> PluginState {
        self.state
    }
}

/// An artifact exporting the scripted plugin plus symbols exercising each
/// install failure kind.
pub fn test_artifact(probe: &Arc<PluginProbe>) -> ArtifactDefinition {
    let probe = Arc::clone(probe);
    ArtifactDefinition::new()
        .named("test-artifact")
        .primary_type("test::TestPlugin")
        .plugin("test::TestPlugin", move || Ok(Box::new(TestPlugin::new(Arc::clone(&probe)))))
        .plugin("test::Broken", || Err("scripted constructor failure".to_string()))
        .library("test::Codec")
        .non_constructible("test::Abstract")
}

/// A fully wired core service stack rooted in a temp directory.
pub struct Stack {
    pub dir: TempDir,
    pub loader: Arc<StaticPluginLoader>,
    pub metrics: Arc<MetricsSink>,
    pub events: Arc<EventBus>,
    pub config: Arc<ConfigStore>,
    pub healing: Arc<Supervisor>,
    pub registry: Arc<PluginRegistry>,
}

pub fn stack() -> Stack {
    stack_with(SupervisorConfig::default())
}

/// Install a log subscriber once so `--nocapture` runs show host activity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn stack_with(supervisor_config: SupervisorConfig) -> Stack {
    init_tracing();
    let dir = TempDir::new().expect("temp dir");
    let loader = Arc::new(StaticPluginLoader::new());
    let metrics = Arc::new(MetricsSink::new());
    let events = Arc::new(EventBus::new(dir.path()));
    let config =
        Arc::new(ConfigStore::new(dir.path(), ConfigSettings::default()).expect("config store"));
    let healing = Arc::new(Supervisor::new(supervisor_config));
    let registry = PluginRegistry::new(
        Arc::clone(&loader) as Arc<dyn PluginLoader>,
        Arc::clone(&config),
        Arc::clone(&events),
        Arc::clone(&healing),
        Arc::clone(&metrics),
    );
    Stack { dir, loader, metrics, events, config, healing, registry }
}

/// Event handler that forwards everything onto a channel.
pub struct Recording {
    pub tx: tokio::sync::mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl EventHandler for Recording {
    async fn handle_event(&self, event: &Event) -> EventResult<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Poll a condition on the real clock, up to `max` total.
pub async fn wait_until(mut check: impl FnMut() -> bool, max: Duration) {
    let deadline = std::time::Instant::now() + max;
    while std::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check(), "condition not reached within {max:?}");
}

/// Step the paused tokio clock one virtual second at a time until the
/// condition holds, yielding between steps so woken tasks run.
pub async fn wait_until_paused(mut check: impl FnMut() -> bool, max_secs: u64) {
    for _ in 0..max_secs {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
    assert!(check(), "condition not reached within {max_secs} virtual seconds");
}

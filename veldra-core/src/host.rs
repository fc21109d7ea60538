//! Host wiring: one explicit construction of every core service, and the
//! ordered shutdown sequence.

use crate::config::{ConfigError, ConfigSettings, ConfigStore};
use crate::events::EventBus;
use crate::events::dlq::DEFAULT_DLQ_MAX_SIZE;
use crate::healing::{Supervisor, SupervisorConfig};
use crate::metrics::MetricsSink;
use crate::monitor::StateObserver;
use crate::plugin::loader::PluginLoader;
use crate::plugin::registry::PluginRegistry;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Host startup errors.
#[derive(Error, Debug)]
pub enum HostError {
    /// The configuration store could not be created.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Tunables of the lifecycle core, with their defaults.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Root working directory holding `config/`, `secrets/`, and `events/`.
    pub base_dir: PathBuf,
    /// Maximum automatic restart attempts before the supervisor gives up.
    pub max_retries: u32,
    /// Backoff before the first restart attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the exponential restart backoff.
    pub max_backoff: Duration,
    /// Consecutive failures before a plugin's circuit opens.
    pub circuit_failure_threshold: u32,
    /// How long an open circuit blocks before probing recovery.
    pub circuit_timeout: Duration,
    /// State observer sampling interval.
    pub observer_interval: Duration,
    /// Dead-letter queue capacity.
    pub dlq_max_size: usize,
    /// Configuration poller interval.
    pub config_poll_interval: Duration,
    /// Staleness window within which a config file counts as changed.
    pub config_staleness_window: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("work"),
            max_retries: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            circuit_failure_threshold: 3,
            circuit_timeout: Duration::from_secs(30),
            observer_interval: Duration::from_secs(30),
            dlq_max_size: DEFAULT_DLQ_MAX_SIZE,
            config_poll_interval: Duration::from_secs(2),
            config_staleness_window: Duration::from_secs(3),
        }
    }
}

impl HostConfig {
    /// Defaults rooted at the given working directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), ..Self::default() }
    }

    fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_retries: self.max_retries,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            failure_threshold: self.circuit_failure_threshold,
            circuit_timeout: self.circuit_timeout,
        }
    }

    fn config_settings(&self) -> ConfigSettings {
        ConfigSettings {
            poll_interval: self.config_poll_interval,
            staleness_window: self.config_staleness_window,
        }
    }
}

/// The running plugin host.
///
/// Owns every core service, constructed exactly once at startup and passed
/// to plugins through their contexts rather than through globals. The
/// config-change channel is consumed here and serialized into the
/// registry's per-plugin locks.
pub struct PluginHost {
    registry: Arc<PluginRegistry>,
    events: Arc<EventBus>,
    config: Arc<ConfigStore>,
    metrics: Arc<MetricsSink>,
    healing: Arc<Supervisor>,
    loader: Arc<dyn PluginLoader>,
    observer: StateObserver,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl PluginHost {
    /// Construct and start every core service.
    ///
    /// Must be called from within a tokio runtime; the config poller, the
    /// state observer, and the config-change consumer are spawned here.
    pub fn start(config: HostConfig, loader: Arc<dyn PluginLoader>) -> Result<Self, HostError> {
        info!(base_dir = %config.base_dir.display(), "starting plugin host");

        let metrics = Arc::new(MetricsSink::new());
        let events = Arc::new(EventBus::with_dlq_size(&config.base_dir, config.dlq_max_size));
        let store = Arc::new(ConfigStore::new(&config.base_dir, config.config_settings())?);
        let healing = Arc::new(Supervisor::new(config.supervisor_config()));

        let registry = PluginRegistry::new(
            Arc::clone(&loader),
            Arc::clone(&store),
            Arc::clone(&events),
            Arc::clone(&healing),
            Arc::clone(&metrics),
        );

        Arc::clone(&store).start();
        let observer = StateObserver::new(config.observer_interval);
        observer.start(&registry);

        let reconciler = store.take_changes().map(|mut changes| {
            let weak = Arc::downgrade(&registry);
            tokio::spawn(async move {
                while let Some(change) = changes.recv().await {
                    let Some(registry) = weak.upgrade() else { break };
                    registry.reconcile_config(&change.plugin, change.config).await;
                }
            })
        });

        info!("plugin host started");
        Ok(Self {
            registry,
            events,
            config: store,
            metrics,
            healing,
            loader,
            observer,
            reconciler: Mutex::new(reconciler),
        })
    }

    /// The lifecycle registry.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// The event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The configuration store.
    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// The metrics sink.
    pub fn metrics(&self) -> &Arc<MetricsSink> {
        &self.metrics
    }

    /// The self-healing supervisor.
    pub fn healing(&self) -> &Arc<Supervisor> {
        &self.healing
    }

    /// The plugin loader the registry installs through.
    pub fn loader(&self) -> &Arc<dyn PluginLoader> {
        &self.loader
    }

    /// Shut the host down in dependency order: observer, supervisor
    /// (5 s drain), configuration store (5 s), event bus (no wait), then
    /// unload every plugin, swallowing per-plugin errors.
    pub async fn shutdown(&self) {
        info!("shutting down plugin host");

        self.observer.shutdown().await;
        self.healing.shutdown().await;
        self.config.shutdown().await;
        if let Some(handle) = self.reconciler.lock().take() {
            handle.abort();
        }
        self.events.shutdown();

        for name in self.registry.names() {
            if let Err(err) = self.registry.unload(&name).await {
                warn!(plugin = %name, error = %err, "error unloading plugin during shutdown");
            }
        }

        info!("plugin host shut down");
    }
}

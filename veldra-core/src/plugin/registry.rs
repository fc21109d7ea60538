//! The plugin registry: sole authority over plugin lifecycle state.

use crate::config::ConfigStore;
use crate::events::{Event, EventBus};
use crate::healing::{RestartFn, Supervisor};
use crate::metrics::MetricsSink;
use crate::plugin::context::{PlatformServices, PluginContext};
use crate::plugin::error::{LoadError, PluginError, RegistryError, RegistryResult};
use crate::plugin::isolate::{IsolationUnit, PluginStatus};
use crate::plugin::loader::{LoadStrategy, LoadedPlugin, PluginLoader};
use crate::plugin::state::PluginState;
use crate::plugin::traits::Plugin;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// Source string stamped on lifecycle events published by the registry.
pub const LIFECYCLE_EVENT_SOURCE: &str = "PluginManager";

/// Snapshot handle returned from a successful install.
#[derive(Debug, Clone)]
pub struct PluginHandle {
    /// The registered plugin name.
    pub name: String,
    /// The installed instance's version.
    pub version: String,
}

/// One row of a registry state snapshot.
#[derive(Debug, Clone)]
pub struct PluginStateInfo {
    /// Plugin name.
    pub name: String,
    /// Current state.
    pub current: PluginState,
    /// Desired state, if a transition is pending recovery.
    pub desired: Option<PluginState>,
}

#[derive(Clone)]
struct PluginEntry {
    unit: Arc<AsyncMutex<IsolationUnit>>,
    status: Arc<PluginStatus>,
    version: String,
}

/// Authoritative plugin lifecycle state machine.
///
/// Installs, transitions, and unloads plugins, coordinating the isolation
/// units, the supervisor, the configuration store, the metrics sink, and
/// the event bus. Lifecycle calls for one plugin name are serialized
/// through that plugin's async mutex; operations on distinct names run
/// independently, and the top-level map is safe for concurrent reads.
pub struct PluginRegistry {
    plugins: DashMap<String, PluginEntry>,
    loader: Arc<dyn PluginLoader>,
    config: Arc<ConfigStore>,
    events: Arc<EventBus>,
    healing: Arc<Supervisor>,
    metrics: Arc<MetricsSink>,
    services: PlatformServices,
}

impl PluginRegistry {
    /// Create the registry and wire the supervisor's callbacks.
    ///
    /// The restart callback drives [`recover`](Self::recover) through a
    /// weak back-reference; the default alert callback logs the give-up.
    /// Callers may replace the alert callback on the supervisor afterwards.
    pub fn new(
        loader: Arc<dyn PluginLoader>,
        config: Arc<ConfigStore>,
        events: Arc<EventBus>,
        healing: Arc<Supervisor>,
        metrics: Arc<MetricsSink>,
    ) -> Arc<Self> {
        let services = PlatformServices::new(Arc::clone(&events), Arc::clone(&metrics));
        let registry = Arc::new(Self {
            plugins: DashMap::new(),
            loader,
            config,
            events,
            healing,
            metrics,
            services,
        });

        let weak = Arc::downgrade(&registry);
        let restart: RestartFn = Arc::new(move |name: String| {
            let weak = weak.clone();
            let attempt: BoxFuture<'static, bool> = Box::pin(async move {
                match weak.upgrade() {
                    Some(registry) => registry.recover(&name).await,
                    None => false,
                }
            });
            attempt
        });
        registry.healing.set_restart_callback(restart);
        registry.healing.set_alert_callback(Arc::new(|name: &str| {
            error!(
                plugin = name,
                "plugin requires manual intervention, automatic recovery exhausted"
            );
        }));

        info!("plugin registry initialized with self-healing enabled");
        registry
    }

    /// Install a plugin with the default parent-first resolution strategy.
    pub async fn install(
        &self,
        name: &str,
        locator: &str,
        type_name: &str,
    ) -> RegistryResult<PluginHandle> {
        self.install_with_strategy(name, locator, type_name, LoadStrategy::default()).await
    }

    /// Install a plugin: resolve the artifact, create an isolation unit
    /// with its own resolution scope, construct and contract-verify the
    /// instance, load its persisted configuration, and record the
    /// `LOADED` state.
    ///
    /// Publishes a `PluginInstalled` event and records the install
    /// duration. On any load failure the freshly created scope is closed
    /// before the error returns.
    pub async fn install_with_strategy(
        &self,
        name: &str,
        locator: &str,
        type_name: &str,
        strategy: LoadStrategy,
    ) -> RegistryResult<PluginHandle> {
        let started = Instant::now();
        info!(plugin = name, locator, type_name, "installing plugin");

        if self.plugins.contains_key(name) {
            return Err(RegistryError::AlreadyInstalled { name: name.to_string() });
        }

        let LoadedPlugin { plugin, scope } = self
            .loader
            .load(name, locator, type_name, strategy)
            .map_err(|err| classify_load_error(name, err))?;

        let version = plugin.version().to_string();
        self.config.load_config(name);
        let context = self.build_context(name, &version);
        let mut unit = IsolationUnit::new(plugin, context, scope);
        let status = unit.status();

        match self.plugins.entry(name.to_string()) {
            Entry::Occupied(_) => {
                // Lost an install race; release the fresh scope.
                unit.close();
                return Err(RegistryError::AlreadyInstalled { name: name.to_string() });
            },
            Entry::Vacant(slot) => {
                slot.insert(PluginEntry {
                    unit: Arc::new(AsyncMutex::new(unit)),
                    status,
                    version: version.clone(),
                });
            },
        }

        self.healing.register(name);
        let duration = started.elapsed();
        self.metrics.record_installed(name, duration);
        self.publish_lifecycle_event("PluginInstalled", name, &version);
        info!(
            plugin = name,
            version = %version,
            duration_ms = duration.as_millis() as u64,
            "plugin installed"
        );

        Ok(PluginHandle { name: name.to_string(), version })
    }

    /// Initialize a `LOADED` plugin with a freshly built context and
    /// register its configuration for change watching.
    pub async fn init(&self, name: &str) -> RegistryResult<()> {
        let entry = self.entry(name)?;
        let mut unit = entry.unit.lock().await;

        let current = unit.status.state();
        if current != PluginState::Loaded {
            return Err(RegistryError::InvalidState {
                name: name.to_string(),
                expected: PluginState::Loaded.to_string(),
                actual: current,
            });
        }

        info!(plugin = name, "initializing plugin");
        let context = self.build_context(name, &entry.version);
        unit.context = context.clone();

        match unit.plugin.init(context).await {
            Ok(()) => {
                unit.status.set_state(PluginState::Initialized);
                if unit.status.desired() == Some(PluginState::Initialized) {
                    unit.status.set_desired(None);
                }
                self.config.watch(name);
                info!(plugin = name, "plugin initialized");
                Ok(())
            },
            Err(err) => {
                self.fail_transition(name, &unit.status, PluginState::Initialized, "initialize", &err);
                Err(RegistryError::Lifecycle {
                    name: name.to_string(),
                    operation: "initialize".to_string(),
                    source: err,
                })
            },
        }
    }

    /// Start an `INITIALIZED` or `STOPPED` plugin.
    ///
    /// Success clears the desired state, resets the supervisor's failure
    /// counter, records the start duration, and publishes `PluginStarted`.
    pub async fn start(&self, name: &str) -> RegistryResult<()> {
        let started = Instant::now();
        let entry = self.entry(name)?;
        let mut unit = entry.unit.lock().await;

        let current = unit.status.state();
        if !current.is_startable() {
            return Err(RegistryError::InvalidState {
                name: name.to_string(),
                expected: "INITIALIZED or STOPPED".to_string(),
                actual: current,
            });
        }

        info!(plugin = name, "starting plugin");
        match unit.plugin.start().await {
            Ok(()) => {
                unit.status.set_state(PluginState::Started);
                unit.status.set_desired(None);
                self.healing.record_success(name);
                let duration = started.elapsed();
                self.metrics.record_started(name, duration);
                self.publish_lifecycle_event("PluginStarted", name, &entry.version);
                info!(
                    plugin = name,
                    duration_ms = duration.as_millis() as u64,
                    "plugin started"
                );
                Ok(())
            },
            Err(err) => {
                self.fail_transition(name, &unit.status, PluginState::Started, "start", &err);
                Err(RegistryError::Lifecycle {
                    name: name.to_string(),
                    operation: "start".to_string(),
                    source: err,
                })
            },
        }
    }

    /// Stop a `STARTED` plugin, publishing `PluginStopped` on success.
    pub async fn stop(&self, name: &str) -> RegistryResult<()> {
        let started = Instant::now();
        let entry = self.entry(name)?;
        let mut unit = entry.unit.lock().await;

        let current = unit.status.state();
        if current != PluginState::Started {
            return Err(RegistryError::InvalidState {
                name: name.to_string(),
                expected: PluginState::Started.to_string(),
                actual: current,
            });
        }

        info!(plugin = name, "stopping plugin");
        match unit.plugin.stop().await {
            Ok(()) => {
                unit.status.set_state(PluginState::Stopped);
                if unit.status.desired() == Some(PluginState::Stopped) {
                    unit.status.set_desired(None);
                }
                let duration = started.elapsed();
                self.metrics.record_stopped(name, duration);
                self.publish_lifecycle_event("PluginStopped", name, &entry.version);
                info!(
                    plugin = name,
                    duration_ms = duration.as_millis() as u64,
                    "plugin stopped"
                );
                Ok(())
            },
            Err(err) => {
                self.fail_transition(name, &unit.status, PluginState::Stopped, "stop", &err);
                Err(RegistryError::Lifecycle {
                    name: name.to_string(),
                    operation: "stop".to_string(),
                    source: err,
                })
            },
        }
    }

    /// Unload a plugin from any state.
    ///
    /// A `STARTED` plugin is stopped best effort (errors logged, not
    /// re-raised), then destroyed; the resolution scope is closed, the
    /// configuration bundle removed, the supervisor unregistered, and the
    /// registry entry dropped.
    pub async fn unload(&self, name: &str) -> RegistryResult<()> {
        let Some((_, entry)) = self.plugins.remove(name) else {
            return Err(RegistryError::NotFound { name: name.to_string() });
        };

        info!(plugin = name, "unloading plugin");
        let mut unit = entry.unit.lock().await;

        if unit.status.state() == PluginState::Started {
            if let Err(err) = unit.plugin.stop().await {
                warn!(plugin = name, error = %err, "error stopping plugin during unload");
            }
        }

        unit.plugin.destroy().await;
        unit.close();
        self.config.remove(name);
        self.healing.unregister(name);
        unit.status.set_state(PluginState::Unloaded);
        self.metrics.record_unloaded(name);
        info!(plugin = name, "plugin unloaded");
        Ok(())
    }

    /// Drive a `FAILED` plugin back toward its desired state.
    ///
    /// With desired `STARTED` (the default when none was recorded) the
    /// plugin is reinitialized with a fresh context and then started,
    /// carrying state through `INITIALIZED`; with desired `INITIALIZED`
    /// only the reinitialization happens. Returns whether the plugin
    /// reached its desired state. Failures feed back into the supervisor.
    pub async fn recover(&self, name: &str) -> bool {
        let Ok(entry) = self.entry(name) else {
            return false;
        };
        let mut unit = entry.unit.lock().await;

        if unit.status.state() != PluginState::Failed {
            return false;
        }

        let desired = unit.status.desired().unwrap_or(PluginState::Started);
        unit.status.set_desired(Some(desired));
        info!(plugin = name, desired = %desired, "attempting plugin recovery");

        let context = self.build_context(name, &entry.version);
        unit.context = context.clone();
        if let Err(err) = unit.plugin.init(context).await {
            self.fail_transition(name, &unit.status, desired, "initialize", &err);
            return false;
        }
        unit.status.set_state(PluginState::Initialized);

        if desired == PluginState::Initialized {
            unit.status.set_desired(None);
            self.healing.record_success(name);
            info!(plugin = name, "plugin recovered to INITIALIZED");
            return true;
        }

        if let Err(err) = unit.plugin.start().await {
            self.fail_transition(name, &unit.status, desired, "start", &err);
            return false;
        }
        unit.status.set_state(PluginState::Started);
        unit.status.set_desired(None);
        self.healing.record_success(name);
        info!(plugin = name, "plugin recovered to STARTED");
        true
    }

    /// React to a changed configuration bundle.
    ///
    /// A `STARTED` plugin is stopped, reinitialized with a context built
    /// from the new configuration, and started again, publishing
    /// `PluginStopped` and `PluginStarted` in that order. A `FAILED`
    /// plugin gets a recovery attempt. Anything else keeps running; the
    /// new bundle applies on the next initialization.
    pub async fn reconcile_config(&self, name: &str, new_config: HashMap<String, String>) {
        let Ok(entry) = self.entry(name) else {
            return;
        };

        match entry.status.state() {
            PluginState::Started => {
                info!(
                    plugin = name,
                    keys = new_config.len(),
                    "configuration changed, restarting plugin"
                );
                self.restart_for_config_change(name, &entry).await;
            },
            PluginState::Failed => {
                info!(plugin = name, "configuration changed for failed plugin, attempting recovery");
                self.recover(name).await;
            },
            state => {
                debug!(
                    plugin = name,
                    state = %state,
                    "plugin not running, configuration applies on next initialization"
                );
            },
        }
    }

    async fn restart_for_config_change(&self, name: &str, entry: &PluginEntry) {
        let mut unit = entry.unit.lock().await;
        if unit.status.state() != PluginState::Started {
            debug!(plugin = name, "plugin no longer started, skipping config restart");
            return;
        }

        if let Err(err) = unit.plugin.stop().await {
            self.fail_transition(name, &unit.status, PluginState::Started, "stop", &err);
            return;
        }
        unit.status.set_state(PluginState::Stopped);
        self.publish_lifecycle_event("PluginStopped", name, &entry.version);

        let context = self.build_context(name, &entry.version);
        unit.context = context.clone();
        if let Err(err) = unit.plugin.init(context).await {
            self.fail_transition(name, &unit.status, PluginState::Started, "initialize", &err);
            return;
        }
        unit.status.set_state(PluginState::Initialized);

        if let Err(err) = unit.plugin.start().await {
            self.fail_transition(name, &unit.status, PluginState::Started, "start", &err);
            return;
        }
        unit.status.set_state(PluginState::Started);
        unit.status.set_desired(None);
        self.healing.record_success(name);
        self.publish_lifecycle_event("PluginStarted", name, &entry.version);
        info!(plugin = name, "plugin restarted with new configuration");
    }

    /// Run a closure against the live plugin instance, serialized with
    /// the plugin's lifecycle operations. Returns `None` for unknown
    /// names.
    pub async fn inspect<R>(&self, name: &str, f: impl FnOnce(&dyn Plugin) -> R) -> Option<R> {
        let entry = self.entry(name).ok()?;
        let unit = entry.unit.lock().await;
        Some(f(unit.plugin.as_ref()))
    }

    /// Current state of a plugin, if installed.
    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.plugins.get(name).map(|entry| entry.status.state())
    }

    /// Desired state of a plugin, if one is pending recovery.
    pub fn desired_state(&self, name: &str) -> Option<PluginState> {
        self.plugins.get(name).and_then(|entry| entry.status.desired())
    }

    /// Whether a plugin is installed under this name.
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Names of all installed plugins.
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Handle (name and version) for an installed plugin.
    pub fn handle(&self, name: &str) -> Option<PluginHandle> {
        self.plugins.get(name).map(|entry| PluginHandle {
            name: name.to_string(),
            version: entry.version.clone(),
        })
    }

    /// Read-only snapshot of current and desired states for every entry.
    pub fn snapshot(&self) -> Vec<PluginStateInfo> {
        let mut states: Vec<PluginStateInfo> = self
            .plugins
            .iter()
            .map(|entry| PluginStateInfo {
                name: entry.key().clone(),
                current: entry.status.state(),
                desired: entry.status.desired(),
            })
            .collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    /// The services exposed to plugins through their contexts.
    pub fn services(&self) -> &PlatformServices {
        &self.services
    }

    fn entry(&self, name: &str) -> RegistryResult<PluginEntry> {
        self.plugins
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound { name: name.to_string() })
    }

    fn build_context(&self, name: &str, version: &str) -> PluginContext {
        PluginContext::new(name, version, Arc::clone(&self.config), self.services.clone())
    }

    /// Common failure tail for lifecycle operations: record `FAILED`, pin
    /// the desired state, count the error, and hand the failure to the
    /// supervisor.
    fn fail_transition(
        &self,
        name: &str,
        status: &PluginStatus,
        desired: PluginState,
        operation: &str,
        err: &PluginError,
    ) {
        status.set_state(PluginState::Failed);
        status.set_desired(Some(desired));
        self.metrics.record_error(name, operation);
        error!(plugin = name, operation, error = %err, "plugin lifecycle operation failed");
        self.healing.record_failure(name, &err.message);
    }

    fn publish_lifecycle_event(&self, event_type: &str, name: &str, version: &str) {
        let event = Event::builder(event_type, LIFECYCLE_EVENT_SOURCE)
            .payload("pluginName", name)
            .payload("pluginVersion", version)
            .payload("timestamp", Utc::now().timestamp_millis())
            .build();
        self.events.publish(event);
        debug!(event_type, plugin = name, "published lifecycle event");
    }
}

fn classify_load_error(name: &str, err: LoadError) -> RegistryError {
    let name = name.to_string();
    match err {
        source @ (LoadError::ArtifactNotFound { .. } | LoadError::TypeNotFound { .. }) => {
            RegistryError::Artifact { name, source }
        },
        source @ (LoadError::NotAPlugin { .. } | LoadError::NoDefaultConstructor { .. }) => {
            RegistryError::Contract { name, source }
        },
        source @ (LoadError::Instantiation { .. } | LoadError::ScopeClosed { .. }) => {
            RegistryError::Instantiation { name, source }
        },
    }
}

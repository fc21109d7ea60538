//! Per-plugin configuration and secrets persisted as JSON files.

use crate::config::error::{ConfigError, ConfigResult};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CONFIG_DIR: &str = "config";
const SECRETS_DIR: &str = "secrets";
const CONFIG_FILE_EXT: &str = "json";

/// Notification that a plugin's configuration file was reloaded.
///
/// Produced by the polling loop (and by explicit saves) onto the change
/// channel; the host consumes the channel and drives reconciliation, which
/// keeps lifecycle work out of the poller's task.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// Plugin whose configuration changed.
    pub plugin: String,
    /// The freshly loaded configuration.
    pub config: HashMap<String, String>,
}

/// Tunables for the change-detection poller.
#[derive(Debug, Clone)]
pub struct ConfigSettings {
    /// How often the poller scans the config directory.
    pub poll_interval: Duration,
    /// A file modified within this window counts as changed.
    pub staleness_window: Duration,
}

impl Default for ConfigSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            staleness_window: Duration::from_secs(3),
        }
    }
}

/// File-backed store for per-plugin configuration and secrets.
///
/// Each plugin owns two JSON object files: `config/<name>.json` and
/// `secrets/<name>.json`. Values are coerced to strings; non-string JSON
/// values keep their JSON representation. Missing files mean empty maps,
/// created lazily. The in-memory maps always reflect the most recently
/// successfully parsed file content; a parse failure keeps the prior
/// content and logs the error.
pub struct ConfigStore {
    config_dir: PathBuf,
    secrets_dir: PathBuf,
    configs: DashMap<String, HashMap<String, String>>,
    secrets: DashMap<String, HashMap<String, String>>,
    /// Plugins whose config changes should be notified. The registry adds
    /// a name here during `init` and removes it on unload.
    watched: DashSet<String>,
    settings: ConfigSettings,
    change_tx: mpsc::UnboundedSender<ConfigChange>,
    change_rx: Mutex<Option<mpsc::UnboundedReceiver<ConfigChange>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConfigStore {
    /// Create the store under `base_dir`, creating both directories.
    pub fn new(base_dir: impl AsRef<Path>, settings: ConfigSettings) -> ConfigResult<Self> {
        let base_dir = base_dir.as_ref();
        let config_dir = base_dir.join(CONFIG_DIR);
        let secrets_dir = base_dir.join(SECRETS_DIR);

        for dir in [&config_dir, &secrets_dir] {
            fs::create_dir_all(dir)
                .map_err(|source| ConfigError::Io { path: dir.clone(), source })?;
        }

        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            config_dir = %config_dir.display(),
            secrets_dir = %secrets_dir.display(),
            "configuration store initialized"
        );

        Ok(Self {
            config_dir,
            secrets_dir,
            configs: DashMap::new(),
            secrets: DashMap::new(),
            watched: DashSet::new(),
            settings,
            change_tx,
            change_rx: Mutex::new(Some(change_rx)),
            poller: Mutex::new(None),
            shutdown_tx,
        })
    }

    fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{name}.{CONFIG_FILE_EXT}"))
    }

    fn secrets_file(&self, name: &str) -> PathBuf {
        self.secrets_dir.join(format!("{name}.{CONFIG_FILE_EXT}"))
    }

    /// Load a plugin's configuration from disk into the cache.
    ///
    /// A missing file yields an empty configuration. A parse failure keeps
    /// the previously cached content.
    pub fn load_config(&self, name: &str) -> HashMap<String, String> {
        let path = self.config_file(name);
        if !path.exists() {
            debug!(plugin = name, "config file not found, using empty configuration");
            let empty = HashMap::new();
            self.configs.insert(name.to_string(), empty.clone());
            return empty;
        }

        match read_string_map(&path) {
            Ok(config) => {
                info!(plugin = name, keys = config.len(), "loaded configuration");
                self.configs.insert(name.to_string(), config.clone());
                config
            },
            Err(err) => {
                error!(plugin = name, error = %err, "failed to load config, keeping previous values");
                self.configs.entry(name.to_string()).or_default().clone()
            },
        }
    }

    /// Load a plugin's secrets from disk into the cache.
    pub fn load_secrets(&self, name: &str) -> HashMap<String, String> {
        let path = self.secrets_file(name);
        if !path.exists() {
            debug!(plugin = name, "secrets file not found, using empty secrets");
            let empty = HashMap::new();
            self.secrets.insert(name.to_string(), empty.clone());
            return empty;
        }

        match read_string_map(&path) {
            Ok(secrets) => {
                info!(plugin = name, keys = secrets.len(), "loaded secrets");
                self.secrets.insert(name.to_string(), secrets.clone());
                secrets
            },
            Err(err) => {
                error!(plugin = name, error = %err, "failed to load secrets, keeping previous values");
                self.secrets.entry(name.to_string()).or_default().clone()
            },
        }
    }

    /// Write a plugin's configuration to disk and refresh the cache.
    ///
    /// Watched plugins get a change notification, the same as an external
    /// edit detected by the poller.
    pub fn save_config(&self, name: &str, config: &HashMap<String, String>) -> ConfigResult<()> {
        let path = self.config_file(name);
        write_string_map(&path, config)?;
        self.configs.insert(name.to_string(), config.clone());
        info!(plugin = name, keys = config.len(), "saved configuration");

        if self.watched.contains(name) {
            let _ = self.change_tx.send(ConfigChange {
                plugin: name.to_string(),
                config: config.clone(),
            });
        }
        Ok(())
    }

    /// Update a single configuration value and persist the bundle.
    pub fn update_config(&self, name: &str, key: &str, value: &str) -> ConfigResult<()> {
        let mut config = self.config(name);
        config.insert(key.to_string(), value.to_string());
        self.save_config(name, &config)
    }

    /// Write a plugin's secrets to disk with owner-only permissions where
    /// the filesystem supports them.
    pub fn save_secrets(&self, name: &str, secrets: &HashMap<String, String>) -> ConfigResult<()> {
        let path = self.secrets_file(name);
        write_string_map(&path, secrets)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(err) = fs::set_permissions(&path, fs::Permissions::from_mode(0o600)) {
                warn!(plugin = name, error = %err, "failed to restrict secrets file permissions");
            }
        }

        self.secrets.insert(name.to_string(), secrets.clone());
        info!(plugin = name, keys = secrets.len(), "saved secrets");
        Ok(())
    }

    /// Get a single configuration value, loading the file on first access.
    pub fn config_value(&self, name: &str, key: &str) -> Option<String> {
        if let Some(config) = self.configs.get(name) {
            return config.get(key).cloned();
        }
        self.load_config(name).get(key).cloned()
    }

    /// Get a plugin's full configuration, loading the file on first access.
    pub fn config(&self, name: &str) -> HashMap<String, String> {
        if let Some(config) = self.configs.get(name) {
            return config.clone();
        }
        self.load_config(name)
    }

    /// Get a single secret value, loading the file on first access.
    pub fn secret(&self, name: &str, key: &str) -> Option<String> {
        if let Some(secrets) = self.secrets.get(name) {
            return secrets.get(key).cloned();
        }
        self.load_secrets(name).get(key).cloned()
    }

    /// Start notifying change events for this plugin.
    pub fn watch(&self, name: &str) {
        self.watched.insert(name.to_string());
        debug!(plugin = name, "watching configuration changes");
    }

    /// Stop notifying change events for this plugin.
    pub fn unwatch(&self, name: &str) {
        self.watched.remove(name);
    }

    /// Drop all state for an unloaded plugin.
    pub fn remove(&self, name: &str) {
        self.configs.remove(name);
        self.secrets.remove(name);
        self.watched.remove(name);
        info!(plugin = name, "removed configuration");
    }

    /// Take the change-notification receiver. Yields `Some` exactly once.
    pub fn take_changes(&self) -> Option<mpsc::UnboundedReceiver<ConfigChange>> {
        self.change_rx.lock().take()
    }

    /// Start the background poller that detects external file edits.
    ///
    /// Every poll interval each known config file is checked; one modified
    /// within the staleness window is reloaded, and watched plugins are
    /// notified on the change channel. Secrets files are not polled and
    /// never trigger notifications.
    pub fn start(self: Arc<Self>) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }

        let store = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.settings.poll_interval;

        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => store.poll_config_files(),
                    _ = shutdown_rx.changed() => break,
                }
            }
        }));
        debug!(interval = ?interval, "configuration poller started");
    }

    fn poll_config_files(&self) {
        let entries = match fs::read_dir(&self.config_dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(error = %err, "error scanning config directory");
                return;
            },
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CONFIG_FILE_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            // Only files whose plugin is already known can have changed
            // relative to a loaded bundle.
            if !self.configs.contains_key(&name) {
                continue;
            }

            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);

            if age <= self.settings.staleness_window {
                info!(plugin = %name, "detected config file change, reloading");
                let config = self.load_config(&name);
                if self.watched.contains(&name) {
                    let _ = self.change_tx.send(ConfigChange { plugin: name, config });
                }
            }
        }
    }

    /// Stop the poller, draining gracefully for up to 5 seconds.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.poller.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("configuration poller did not stop in time, aborting");
                abort.abort();
            }
        }
        info!("configuration store shut down");
    }
}

/// Read a JSON object file into a string map, coercing non-string values
/// to their JSON representation.
fn read_string_map(path: &Path) -> ConfigResult<HashMap<String, String>> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let object: serde_json::Map<String, Value> = serde_json::from_str(&raw)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

    Ok(object.into_iter().map(|(key, value)| (key, coerce_value(value))).collect())
}

fn write_string_map(path: &Path, map: &HashMap<String, String>) -> ConfigResult<()> {
    let object: serde_json::Map<String, Value> = map
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    let pretty = serde_json::to_string_pretty(&Value::Object(object))
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
    fs::write(path, pretty).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
}

fn coerce_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

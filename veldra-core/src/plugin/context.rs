//! Read-only execution context handed to plugins on `init`.

use crate::config::ConfigStore;
use crate::events::EventBus;
use crate::metrics::MetricsSink;
use std::collections::HashMap;
use std::sync::Arc;

/// Platform services exposed to plugins through their context.
#[derive(Clone)]
pub struct PlatformServices {
    event_bus: Arc<EventBus>,
    metrics: Arc<MetricsSink>,
}

impl PlatformServices {
    /// Bundle the host services.
    pub fn new(event_bus: Arc<EventBus>, metrics: Arc<MetricsSink>) -> Self {
        Self { event_bus, metrics }
    }

    /// The host event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// The host metrics sink.
    pub fn metrics(&self) -> &Arc<MetricsSink> {
        &self.metrics
    }
}

struct ContextInner {
    plugin_name: String,
    plugin_version: String,
    config: Arc<ConfigStore>,
    services: PlatformServices,
}

/// Read-only handle a plugin uses to reach its configuration, secrets,
/// logging scope, and the platform services.
///
/// A context is created per `init`, including the reinitialization driven
/// by a configuration change, so configuration reads always reflect the
/// bundle current at that init. Plugins must not hold a context beyond
/// their next `stop`.
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

impl PluginContext {
    /// Build a context for the named plugin.
    pub fn new(
        plugin_name: impl Into<String>,
        plugin_version: impl Into<String>,
        config: Arc<ConfigStore>,
        services: PlatformServices,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                plugin_name: plugin_name.into(),
                plugin_version: plugin_version.into(),
                config,
                services,
            }),
        }
    }

    /// The plugin's registered name.
    pub fn plugin_name(&self) -> &str {
        &self.inner.plugin_name
    }

    /// The plugin's version.
    pub fn plugin_version(&self) -> &str {
        &self.inner.plugin_version
    }

    /// Read a configuration value.
    pub fn config(&self, key: &str) -> Option<String> {
        self.inner.config.config_value(&self.inner.plugin_name, key)
    }

    /// Read a configuration value, falling back to a default.
    pub fn config_or(&self, key: &str, default: &str) -> String {
        self.config(key).unwrap_or_else(|| default.to_string())
    }

    /// All configuration key/value pairs for this plugin.
    pub fn config_all(&self) -> HashMap<String, String> {
        self.inner.config.config(&self.inner.plugin_name)
    }

    /// Read a secret value.
    pub fn secret(&self, key: &str) -> Option<String> {
        self.inner.config.secret(&self.inner.plugin_name, key)
    }

    /// A plugin-scoped logging span carrying the plugin name.
    ///
    /// Enter it (or instrument futures with it) so the plugin's log lines
    /// are attributed to it.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("plugin", name = %self.inner.plugin_name)
    }

    /// The host event bus.
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(self.inner.services.event_bus())
    }

    /// The host metrics sink.
    pub fn metrics(&self) -> Arc<MetricsSink> {
        Arc::clone(self.inner.services.metrics())
    }

    /// The full service bundle.
    pub fn services(&self) -> &PlatformServices {
        &self.inner.services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSettings;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> (PluginContext, Arc<ConfigStore>) {
        let config = Arc::new(ConfigStore::new(dir.path(), ConfigSettings::default()).expect("store"));
        let events = Arc::new(EventBus::new(dir.path()));
        let metrics = Arc::new(MetricsSink::new());
        let services = PlatformServices::new(events, metrics);
        (PluginContext::new("p1", "1.0.0", Arc::clone(&config), services), config)
    }

    #[test]
    fn exposes_identity_and_config() {
        let dir = TempDir::new().expect("temp dir");
        let (context, config) = context(&dir);

        let mut bundle = HashMap::new();
        bundle.insert("greeting".to_string(), "hi".to_string());
        config.save_config("p1", &bundle).expect("save");

        assert_eq!(context.plugin_name(), "p1");
        assert_eq!(context.plugin_version(), "1.0.0");
        assert_eq!(context.config("greeting").as_deref(), Some("hi"));
        assert_eq!(context.config_or("absent", "fallback"), "fallback");
        assert_eq!(context.config_all(), bundle);
        assert!(context.secret("absent").is_none());
    }

    #[test]
    fn clones_share_the_same_inner() {
        let dir = TempDir::new().expect("temp dir");
        let (context, _config) = context(&dir);
        let clone = context.clone();
        assert_eq!(clone.plugin_name(), context.plugin_name());
    }
}

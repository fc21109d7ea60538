//! # Veldra Core
//!
//! Runtime host for pluggable backend modules with automatic failure
//! detection and recovery.
//!
//! This crate provides the plugin lifecycle core:
//! - An authoritative lifecycle registry driving each plugin through
//!   `LOADED → INITIALIZED → STARTED → STOPPED → UNLOADED`
//! - Per-plugin isolation units with private symbol resolution scopes
//! - A self-healing supervisor restarting failed plugins under a
//!   circuit breaker with exponential backoff
//! - A publish/subscribe event bus with wildcard subscriptions, a
//!   dead-letter queue, and on-disk replay
//! - A file-backed configuration store with polling hot reload that
//!   drives live plugin restarts
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use veldra_core::host::{HostConfig, PluginHost};
//! use veldra_core::plugin::StaticPluginLoader;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = Arc::new(StaticPluginLoader::new());
//! let host = PluginHost::start(HostConfig::new("work"), loader.clone())?;
//!
//! let registry = host.registry();
//! registry.install("demo", "demo.artifact", "demo::DemoPlugin").await?;
//! registry.init("demo").await?;
//! registry.start("demo").await?;
//!
//! host.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod events;
pub mod healing;
pub mod host;
pub mod metrics;
pub mod monitor;
pub mod plugin;

pub use host::{HostConfig, HostError, PluginHost};
pub use plugin::{Plugin, PluginContext, PluginRegistry, PluginState};

/// Re-export commonly used types for convenience.
pub mod prelude {
    pub use crate::config::{ConfigSettings, ConfigStore};
    pub use crate::events::{Event, EventBus, EventError, EventHandler};
    pub use crate::healing::{CircuitState, Supervisor, SupervisorConfig};
    pub use crate::host::{HostConfig, PluginHost};
    pub use crate::metrics::MetricsSink;
    pub use crate::plugin::{
        ArtifactDefinition, LoadStrategy, Plugin, PluginContext, PluginError, PluginRegistry,
        PluginResult, PluginState, RegistryError, StaticPluginLoader,
    };
}

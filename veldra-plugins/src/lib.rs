//! Bundled example plugins for the Veldra plugin host.
//!
//! Two plugins exercise the public API end to end:
//! - [`HeartbeatPlugin`]: configuration access and a periodic task tied to
//!   the start/stop lifecycle
//! - [`ObservabilityPlugin`]: wildcard event subscription and periodic
//!   metrics snapshots through the context services

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod heartbeat;
pub mod observability;

pub use heartbeat::HeartbeatPlugin;
pub use observability::ObservabilityPlugin;

use veldra_core::plugin::ArtifactDefinition;

/// Provider descriptor for the bundled artifact, one plugin type per line.
pub const BUNDLED_PROVIDERS: &str = "\
# Veldra bundled plugins
veldra_plugins::HeartbeatPlugin
veldra_plugins::ObservabilityPlugin
";

/// Artifact definition exporting both bundled plugins, ready to register
/// with a `StaticPluginLoader`.
pub fn bundled_artifact() -> ArtifactDefinition {
    ArtifactDefinition::new()
        .named("veldra-bundled")
        .primary_type("veldra_plugins::HeartbeatPlugin")
        .plugin("veldra_plugins::HeartbeatPlugin", || Ok(Box::new(HeartbeatPlugin::new())))
        .plugin("veldra_plugins::ObservabilityPlugin", || {
            Ok(Box::new(ObservabilityPlugin::new()))
        })
        .providers_from_descriptor(BUNDLED_PROVIDERS)
}

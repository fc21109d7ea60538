//! The bundled plugins running under a real host.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use veldra_core::host::{HostConfig, PluginHost};
use veldra_core::plugin::{PluginLoader, PluginState, StaticPluginLoader};
use veldra_plugins::bundled_artifact;

const ARTIFACT: &str = "bundled.artifact";

#[tokio::test]
async fn bundled_plugins_run_under_the_host() {
    let dir = TempDir::new().expect("temp dir");
    let loader = Arc::new(StaticPluginLoader::new());
    loader.register_artifact(ARTIFACT, bundled_artifact());

    let mut config = HostConfig::new(dir.path());
    config.observer_interval = Duration::from_secs(60);
    let host =
        PluginHost::start(config, Arc::clone(&loader) as Arc<dyn PluginLoader>).expect("host");
    let registry = host.registry();

    let heartbeat = registry
        .install("heartbeat", ARTIFACT, "veldra_plugins::HeartbeatPlugin")
        .await
        .expect("install heartbeat");
    assert_eq!(heartbeat.version, "1.0.0");
    registry.init("heartbeat").await.expect("init heartbeat");
    registry.start("heartbeat").await.expect("start heartbeat");

    registry
        .install("observability", ARTIFACT, "veldra_plugins::ObservabilityPlugin")
        .await
        .expect("install observability");
    registry.init("observability").await.expect("init observability");
    registry.start("observability").await.expect("start observability");

    assert_eq!(registry.state("heartbeat"), Some(PluginState::Started));
    assert_eq!(registry.state("observability"), Some(PluginState::Started));
    // The observability plugin's wildcard subscription is live.
    assert!(host.events().subscription_count() >= 1);

    registry.stop("heartbeat").await.expect("stop heartbeat");
    assert_eq!(registry.state("heartbeat"), Some(PluginState::Stopped));

    host.shutdown().await;
    assert!(!registry.contains("heartbeat"));
    assert!(!registry.contains("observability"));
}

#[tokio::test]
async fn discovery_derives_descriptor_from_the_manifest() {
    let loader = StaticPluginLoader::new();
    loader.register_artifact("plugins/bundled.artifact", bundled_artifact());

    let descriptor = loader
        .discover("plugins/bundled.artifact")
        .expect("discover")
        .expect("descriptor derivable");
    assert_eq!(descriptor.name, "veldra-bundled");
    assert_eq!(descriptor.type_name, "veldra_plugins::HeartbeatPlugin");
}

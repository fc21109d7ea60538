//! Periodic observer making reconciliation gaps visible.

use crate::plugin::registry::{PluginRegistry, PluginStateInfo};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Periodically samples the registry and logs one line of the form
/// `name=CURRENT(desired:DESIRED)` per plugin, so a plugin stuck away
/// from its desired state shows up in the logs without any query traffic.
pub struct StateObserver {
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl StateObserver {
    /// Create an observer with the given sampling interval.
    pub fn new(interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { interval, task: Mutex::new(None), shutdown_tx }
    }

    /// Start sampling. The first pass runs immediately.
    ///
    /// Only a weak registry reference is held, so the observer never keeps
    /// the registry alive.
    pub fn start(&self, registry: &Arc<PluginRegistry>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let weak: Weak<PluginRegistry> = Arc::downgrade(registry);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.interval;

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(registry) = weak.upgrade() else { break };
                        let snapshot = registry.snapshot();
                        if !snapshot.is_empty() {
                            info!(states = %Self::render(&snapshot), "plugin states");
                        }
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
        }));
        info!(interval_ms = self.interval.as_millis() as u64, "plugin state observer started");
    }

    /// Render a snapshot as the observer's log line.
    pub fn render(states: &[PluginStateInfo]) -> String {
        states
            .iter()
            .map(|info| match info.desired {
                Some(desired) => format!("{}={}(desired:{})", info.name, info.current, desired),
                None => format!("{}={}", info.name, info.current),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Stop the observer.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
                warn!("state observer did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::state::PluginState;

    #[test]
    fn render_includes_desired_state_when_present() {
        let states = vec![
            PluginStateInfo {
                name: "p1".to_string(),
                current: PluginState::Failed,
                desired: Some(PluginState::Started),
            },
            PluginStateInfo {
                name: "p2".to_string(),
                current: PluginState::Stopped,
                desired: None,
            },
        ];

        assert_eq!(StateObserver::render(&states), "p1=FAILED(desired:STARTED) p2=STOPPED");
    }

    #[test]
    fn render_of_empty_snapshot_is_empty() {
        assert_eq!(StateObserver::render(&[]), "");
    }
}

//! The isolation unit binding a plugin instance to its private resources.

use crate::plugin::context::PluginContext;
use crate::plugin::loader::ResolutionScope;
use crate::plugin::state::PluginState;
use crate::plugin::traits::Plugin;
use parking_lot::RwLock;
use std::sync::Arc;

/// Current and desired state of a plugin, readable without taking the
/// unit's lifecycle lock.
///
/// The registry is the only writer; writes happen while it holds the
/// per-plugin lifecycle lock, so readers see a consistent progression.
/// The desired state records where the plugin was meant to be when a
/// transition failed, letting recovery drive it back there.
#[derive(Debug)]
pub struct PluginStatus {
    state: RwLock<PluginState>,
    desired: RwLock<Option<PluginState>>,
}

impl PluginStatus {
    /// Create a status cell starting in the given state.
    pub fn new(initial: PluginState) -> Self {
        Self { state: RwLock::new(initial), desired: RwLock::new(None) }
    }

    /// The current state.
    pub fn state(&self) -> PluginState {
        *self.state.read()
    }

    /// Record a new current state.
    pub fn set_state(&self, state: PluginState) {
        *self.state.write() = state;
    }

    /// The desired state, if a transition is pending recovery.
    pub fn desired(&self) -> Option<PluginState> {
        *self.desired.read()
    }

    /// Record or clear the desired state.
    pub fn set_desired(&self, desired: Option<PluginState>) {
        *self.desired.write() = desired;
    }
}

/// Owns a single plugin instance and its private resources: the current
/// context, the shared status cell, and the plugin's class-resolution
/// scope.
///
/// The registry serializes all access through a per-plugin async mutex
/// wrapping the unit; the status cell is additionally shared outside the
/// lock for read-only snapshots.
pub struct IsolationUnit {
    /// The plugin instance, exclusively owned by this unit.
    pub(crate) plugin: Box<dyn Plugin>,
    /// The context from the most recent `init`; regenerated on every
    /// reinitialization.
    pub(crate) context: PluginContext,
    /// Shared state cell, also held by the registry entry.
    pub(crate) status: Arc<PluginStatus>,
    /// The unit's private symbol resolution scope.
    pub(crate) scope: ResolutionScope,
}

impl IsolationUnit {
    /// Create a unit in the `LOADED` state.
    pub fn new(plugin: Box<dyn Plugin>, context: PluginContext, scope: ResolutionScope) -> Self {
        Self {
            plugin,
            context,
            status: Arc::new(PluginStatus::new(PluginState::Loaded)),
            scope,
        }
    }

    /// The shared status cell.
    pub fn status(&self) -> Arc<PluginStatus> {
        Arc::clone(&self.status)
    }

    /// The context handed to the plugin at its last `init`.
    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    /// Close the unit, releasing its resolution scope.
    pub fn close(&mut self) {
        self.scope.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tracks_current_and_desired() {
        let status = PluginStatus::new(PluginState::Loaded);
        assert_eq!(status.state(), PluginState::Loaded);
        assert_eq!(status.desired(), None);

        status.set_state(PluginState::Failed);
        status.set_desired(Some(PluginState::Started));
        assert_eq!(status.state(), PluginState::Failed);
        assert_eq!(status.desired(), Some(PluginState::Started));

        status.set_desired(None);
        assert_eq!(status.desired(), None);
    }
}

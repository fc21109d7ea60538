//! Plugin lifecycle states and the legal transition table.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a plugin as recorded by the registry.
///
/// States follow the typical progression
/// `INSTALLED → LOADED → INITIALIZED → STARTED → STOPPED → UNLOADED`,
/// with `FAILED` reachable from any lifecycle operation that errors.
/// The registry is the single writer of these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginState {
    /// Artifact discovered but not yet loaded into the host.
    Installed,

    /// Plugin instance constructed and registered; not yet initialized.
    Loaded,

    /// Plugin initialized with its context and ready to start.
    Initialized,

    /// Plugin active and running.
    Started,

    /// Plugin stopped but still resident; may be started again.
    Stopped,

    /// Plugin removed from the host; its registry entry is gone.
    Unloaded,

    /// A lifecycle operation failed; recovery may drive the plugin back.
    Failed,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Installed => "INSTALLED",
            Self::Loaded => "LOADED",
            Self::Initialized => "INITIALIZED",
            Self::Started => "STARTED",
            Self::Stopped => "STOPPED",
            Self::Unloaded => "UNLOADED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

impl PluginState {
    /// Check whether `start` is legal from this state.
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Initialized | Self::Stopped)
    }

    /// Check whether the plugin is in a state recovery can act on.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Get the set of states legally reachable from this state.
    ///
    /// `Unloaded` is reachable from everywhere because `unload` is allowed
    /// from any state.
    pub fn valid_transitions(&self) -> Vec<PluginState> {
        match self {
            Self::Installed => vec![Self::Loaded, Self::Unloaded],
            Self::Loaded => vec![Self::Initialized, Self::Failed, Self::Unloaded],
            Self::Initialized => vec![Self::Started, Self::Failed, Self::Unloaded],
            Self::Started => vec![Self::Stopped, Self::Failed, Self::Unloaded],
            Self::Stopped => vec![Self::Started, Self::Failed, Self::Unloaded],
            Self::Failed => vec![Self::Initialized, Self::Started, Self::Unloaded],
            Self::Unloaded => vec![],
        }
    }

    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: PluginState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

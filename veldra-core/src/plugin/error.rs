//! Error types for the plugin system.

use crate::plugin::state::PluginState;
use thiserror::Error;

/// Error raised by a plugin's own lifecycle code (`init`, `start`, `stop`).
///
/// Plugins report failure by returning this from the lifecycle methods;
/// `destroy` never fails. The registry wraps it into
/// [`RegistryError::Lifecycle`] before surfacing it to callers.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct PluginError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl PluginError {
    /// Create a new plugin error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

/// Result type for plugin lifecycle methods.
pub type PluginResult<T> = Result<T, PluginError>;

/// Artifact loading and instantiation errors.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// No artifact is registered under the given locator
    #[error("artifact not found: {locator}")]
    ArtifactNotFound {
        /// Artifact locator that failed to resolve
        locator: String,
    },

    /// The artifact does not export the requested type
    #[error("plugin type not found: {type_name} in artifact: {locator}")]
    TypeNotFound {
        /// Requested type name
        type_name: String,
        /// Artifact locator that was searched
        locator: String,
    },

    /// The resolved symbol is not a plugin type
    #[error("type {type_name} does not implement the plugin contract")]
    NotAPlugin {
        /// Resolved type name
        type_name: String,
    },

    /// The resolved plugin type has no parameterless constructor
    #[error("plugin type {type_name} has no parameterless constructor")]
    NoDefaultConstructor {
        /// Resolved type name
        type_name: String,
    },

    /// The plugin constructor ran but failed
    #[error("failed to construct plugin instance {type_name}: {reason}")]
    Instantiation {
        /// Type whose constructor failed
        type_name: String,
        /// Constructor failure description
        reason: String,
    },

    /// The resolution scope was closed before the lookup
    #[error("resolution scope already closed: {scope}")]
    ScopeClosed {
        /// Name of the closed scope
        scope: String,
    },
}

/// Registry operation errors, covering the full lifecycle fault taxonomy.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A plugin with the same name is already installed
    #[error("plugin already installed: {name}")]
    AlreadyInstalled {
        /// Conflicting plugin name
        name: String,
    },

    /// No plugin registered under the given name
    #[error("plugin not found: {name}")]
    NotFound {
        /// Requested plugin name
        name: String,
    },

    /// Operation invoked while the plugin is in the wrong state
    #[error("plugin {name} must be {expected}, current: {actual}")]
    InvalidState {
        /// Plugin name
        name: String,
        /// States the operation requires
        expected: String,
        /// State the plugin was actually in
        actual: PluginState,
    },

    /// The artifact could not be opened or does not yield the named type
    #[error("artifact fault installing {name}: {source}")]
    Artifact {
        /// Plugin name being installed
        name: String,
        /// Underlying load failure
        #[source]
        source: LoadError,
    },

    /// The resolved type violates the plugin contract
    #[error("contract violation installing {name}: {source}")]
    Contract {
        /// Plugin name being installed
        name: String,
        /// Underlying load failure
        #[source]
        source: LoadError,
    },

    /// The plugin constructor failed
    #[error("instantiation failed installing {name}: {source}")]
    Instantiation {
        /// Plugin name being installed
        name: String,
        /// Underlying load failure
        #[source]
        source: LoadError,
    },

    /// The plugin's own lifecycle code raised
    #[error("failed to {operation} plugin {name}: {source}")]
    Lifecycle {
        /// Plugin name
        name: String,
        /// Lifecycle operation that failed (`init`, `start`, `stop`)
        operation: String,
        /// The plugin's reported error
        #[source]
        source: PluginError,
    },
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

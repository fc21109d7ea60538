//! Error types for the configuration store.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration store errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Filesystem access failed
    #[error("config I/O error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A config or secrets file did not parse as a JSON object
    #[error("config parse error at {path}: {source}")]
    Parse {
        /// Path of the malformed file
        path: PathBuf,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for configuration store operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

//! # Pluginhost Kernel Errors
//!
//! Defines [`Error`], the crate-wide error type. Each subsystem owns a typed
//! error enum (`PluginSystemError`, `EventSystemError`, `StorageSystemError`,
//! `SupervisorError`) and this type aggregates them via `#[from]` so callers
//! can use a single `Result` alias while still matching on the specific
//! subsystem error when they need to.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::event::error::EventSystemError;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::supervisor::SupervisorError;
use crate::storage::error::StorageSystemError;

/// Crate-wide error type.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Plugin lifecycle / registry error.
    #[error("plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Event bus error.
    #[error("event system error: {0}")]
    EventSystem(#[from] EventSystemError),

    /// Configuration / secrets store error.
    #[error("storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),

    /// Supervisor error (give-up is not an error variant; see `PluginSystemError::RecoveryGaveUp`).
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Error during a named phase of host startup/shutdown.
    #[error("host lifecycle error during {phase}: {message}")]
    HostLifecycle {
        phase: HostLifecyclePhase,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Generic error with a message, used sparingly at call sites that have
    /// no more specific variant to reach for.
    #[error("{0}")]
    Other(String),
}

/// Named phase of the host's startup/shutdown sequence, used for
/// diagnostics when a phase fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum HostLifecyclePhase {
    #[error("initialize")]
    Initialize,
    #[error("start")]
    Start,
    #[error("shutdown")]
    Shutdown,
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl Error {
    /// Build a `StorageSystem(Io)` error with context, the same helper
    /// shape the teacher keeps on its kernel error type.
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        Error::StorageSystem(StorageSystemError::Io {
            source,
            operation: operation.into(),
            path,
        })
    }
}

/// Shorthand for `Result` with the crate's `Error` type.
pub type Result<T> = StdResult<T, Error>;

//! # Pluginhost Plugin System Errors
//!
//! Defines [`PluginSystemError`], the taxonomy of failures the Plugin
//! Registry, Supervisor, and loader can produce. Each variant carries the
//! plugin name it concerns and, where the failure wraps a lower-level
//! cause, a boxed `#[source]`.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginSystemError {
    /// Operation invoked while the plugin was in a state that does not
    /// permit it (e.g. `start` on a plugin that was never `init`ed).
    #[error("precondition violation for plugin '{plugin_name}': {message}")]
    PreconditionViolation {
        plugin_name: String,
        message: String,
    },

    /// The artifact an `install` referred to was missing, unreadable, or
    /// did not yield the named class.
    #[error("artifact fault for plugin '{plugin_name}' (locator '{locator}'): {message}")]
    ArtifactFault {
        plugin_name: String,
        locator: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// A class resolved from an artifact does not implement the plugin
    /// contract, or has no usable parameterless constructor registered.
    #[error("contract violation for plugin '{plugin_name}', class '{class_id}': {message}")]
    ContractViolation {
        plugin_name: String,
        class_id: String,
        message: String,
    },

    /// The plugin's own `init`/`start`/`stop` raised. Always drives the
    /// registry entry to `FAILED` and notifies the Supervisor.
    #[error("lifecycle fault for plugin '{plugin_name}' during {operation}: {source}")]
    LifecycleFault {
        plugin_name: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The Supervisor exhausted its retry budget for a plugin. Never
    /// surfaced to a direct caller; only reaches the alert callback and
    /// the logs, per the propagation policy.
    #[error("recovery gave up for plugin '{plugin_name}' after {attempts} attempts")]
    RecoveryGaveUp {
        plugin_name: String,
        attempts: u32,
    },

    /// An artifact locator was never registered with the loader in use.
    #[error("unknown artifact locator '{0}'")]
    UnknownArtifact(String),

    /// A plugin name the caller expected to find is not in the registry.
    #[error("no such plugin: '{0}'")]
    NotFound(String),

    /// `install` targeted a name that is already registered.
    #[error("plugin '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("plugin system I/O error for '{plugin_name}' at '{}': {source}", path.display())]
    Io {
        plugin_name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

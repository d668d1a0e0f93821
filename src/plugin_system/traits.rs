//! The plugin contract: the trait every pluggable backend module
//! implements, and the state machine the Registry drives it through.
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::plugin_system::context::PluginContext;

/// Plugin lifecycle state, exhaustive and ordered by typical progression
/// per the data model: `Installed -> Loaded -> Initialized -> Started ->
/// Stopped -> Unloaded`, plus terminal-in-practice `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Installed,
    Loaded,
    Initialized,
    Started,
    Stopped,
    Failed,
    Unloaded,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Installed => "INSTALLED",
            PluginState::Loaded => "LOADED",
            PluginState::Initialized => "INITIALIZED",
            PluginState::Started => "STARTED",
            PluginState::Stopped => "STOPPED",
            PluginState::Failed => "FAILED",
            PluginState::Unloaded => "UNLOADED",
        };
        write!(f, "{s}")
    }
}

/// Error a plugin's own `init`/`start`/`stop` may return. The Registry
/// wraps this into `PluginSystemError::LifecycleFault` before it ever
/// reaches a caller.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PluginError(pub String);

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        PluginError(message.into())
    }
}

/// Core trait every plugin implements. Mirrors the External Interfaces
/// contract: `destroy` never throws, everything else reports failure via
/// `Result`.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identity for this plugin. Not necessarily the name it is
    /// installed under in the registry, though fixtures typically match.
    fn name(&self) -> &str;

    /// Plugin version string, opaque to the host.
    fn version(&self) -> &str;

    /// Called once per `init`, including reinitializations driven by
    /// configuration changes. The context handed in is fresh each time;
    /// the plugin must not retain references to it beyond `stop`.
    async fn init(&self, ctx: PluginContext) -> Result<(), PluginError>;

    /// Called on `start`. May be called again after a `stop` (restart).
    async fn start(&self) -> Result<(), PluginError>;

    /// Called on `stop`.
    async fn stop(&self) -> Result<(), PluginError>;

    /// Called once during `unload`, after a best-effort `stop`. Never
    /// fails; any cleanup errors are the plugin's own problem to log.
    async fn destroy(&self);

    /// The plugin's own view of its state, primarily for diagnostics;
    /// the Registry's bookkeeping is authoritative.
    fn state(&self) -> PluginState;
}

//! `pluginhost-core`: the plugin lifecycle core of a backend plugin host —
//! the Registry state machine, the Isolation Unit, the Supervisor/Circuit
//! Breaker self-healing loop, the Event Bus, and the Configuration Store.
//!
//! HTTP/REST, CLI flag parsing, log rotation, artifact discovery, and the
//! RPC transport are external collaborators and live outside this crate;
//! [`kernel::Host`] is the entry point they drive.
pub mod event;
pub mod kernel;
pub mod metrics;
pub mod plugin_system;
pub mod storage;
pub mod utils;

pub use event::{Event, EventBus, EventSystemError};
pub use kernel::{Error as KernelError, Host, Result as KernelResult};
pub use metrics::MetricsSink;
pub use plugin_system::{Plugin, PluginContext, PluginError, PluginState, PluginSystemError};
pub use storage::{ConfigBundle, ConfigurationStore, StorageSystemError};

//! The read-only handle a plugin receives on `init`: its own identity,
//! read views over its configuration bundle, and a lookup for the
//! services the host exposes.
use std::collections::HashMap;
use std::sync::Arc;

use crate::event::bus::EventBus;
use crate::metrics::MetricsSink;
use crate::storage::config_store::ConfigBundle;

/// Read-only view over a plugin's regular configuration.
#[derive(Debug, Clone)]
pub struct ConfigReader {
    values: HashMap<String, String>,
}

impl ConfigReader {
    pub(crate) fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Read-only view over a plugin's secrets. Kept as a distinct type from
/// [`ConfigReader`] so a plugin cannot accidentally iterate secrets
/// alongside regular configuration.
#[derive(Debug, Clone)]
pub struct SecretsReader {
    values: HashMap<String, String>,
}

impl SecretsReader {
    pub(crate) fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Placeholder for the RPC transport used for plugin-to-plugin calls.
/// No transport is implemented in this crate (out of scope); the slot
/// exists so `PluginContext` shapes the full contract a real host would
/// hand a plugin.
pub trait RpcClientFactory: Send + Sync {
    fn describe(&self) -> &str;
}

/// Handle onto the services a plugin may reach for: the Event Bus, the
/// Metrics Sink, and (optionally) an RPC client factory.
#[derive(Clone)]
pub struct Services {
    pub event_bus: Arc<EventBus>,
    pub metrics: Arc<MetricsSink>,
    pub rpc: Option<Arc<dyn RpcClientFactory>>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("rpc_wired", &self.rpc.is_some())
            .finish_non_exhaustive()
    }
}

/// The context handed to a plugin on `init`. Re-created fresh for every
/// `init` call, including reinitializations driven by configuration
/// changes; a plugin must not cache it beyond `stop`.
#[derive(Debug, Clone)]
pub struct PluginContext {
    name: String,
    version: String,
    config: ConfigReader,
    secrets: SecretsReader,
    services: Services,
}

impl PluginContext {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        bundle: &ConfigBundle,
        services: Services,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            config: ConfigReader::new(bundle.config.clone()),
            secrets: SecretsReader::new(bundle.secrets.clone()),
            services,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &ConfigReader {
        &self.config
    }

    pub fn secrets(&self) -> &SecretsReader {
        &self.secrets
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// A logging target scoped to this plugin, suitable as the `target`
    /// argument to the `log` facade macros.
    pub fn log_target(&self) -> String {
        format!("plugin::{}", self.name)
    }
}

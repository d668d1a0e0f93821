//! The Plugin Registry: sole authority over plugin state, per §4.1.
//! Lifecycle calls for a given name are serialized through a per-name
//! mutex (the [`IsolationUnit`]'s own lock); operations on different
//! names are independent, and the top-level map is safe for concurrent
//! reads.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::event::bus::EventBus;
use crate::event::types::Event;
use crate::metrics::MetricsSink;
use crate::plugin_system::context::{PluginContext, Services};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::isolation::{ClassScope, IsolationUnit, ResolutionStrategy};
use crate::plugin_system::loader::PluginLoader;
use crate::plugin_system::supervisor::Supervisor;
use crate::plugin_system::traits::PluginState;
use crate::storage::config_store::{ConfigBundle, ConfigurationStore};

/// Operations every registry implementation exposes, per §4.1.
#[async_trait]
pub trait PluginRegistry: Send + Sync {
    async fn install(&self, name: &str, locator: &str, class_id: &str) -> Result<(), PluginSystemError>;
    async fn init(&self, name: &str) -> Result<(), PluginSystemError>;
    async fn start(&self, name: &str) -> Result<(), PluginSystemError>;
    async fn stop(&self, name: &str) -> Result<(), PluginSystemError>;
    async fn unload(&self, name: &str);
    async fn recover(&self, name: &str) -> Result<bool, PluginSystemError>;
    async fn reconcile_config(&self, name: &str, bundle: ConfigBundle) -> Result<(), PluginSystemError>;
    async fn state(&self, name: &str) -> Option<PluginState>;
    async fn desired_state(&self, name: &str) -> Option<PluginState>;
    async fn list_names(&self) -> Vec<String>;
}

/// The richer, fully-wired implementation: Registry + Supervisor +
/// Configuration Store + Event Bus + Metrics Sink. No simpler variant
/// is built alongside it.
pub struct DefaultPluginRegistry {
    entries: RwLock<HashMap<String, Arc<Mutex<IsolationUnit>>>>,
    loader: Arc<dyn PluginLoader>,
    event_bus: Arc<EventBus>,
    metrics: Arc<MetricsSink>,
    supervisor: Arc<Supervisor>,
    config_store: Arc<ConfigurationStore>,
    root_scope: Arc<ClassScope>,
    rpc: Option<Arc<dyn crate::plugin_system::context::RpcClientFactory>>,
}

impl std::fmt::Debug for DefaultPluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultPluginRegistry").finish_non_exhaustive()
    }
}

impl DefaultPluginRegistry {
    pub fn new(
        loader: Arc<dyn PluginLoader>,
        event_bus: Arc<EventBus>,
        metrics: Arc<MetricsSink>,
        supervisor: Arc<Supervisor>,
        config_store: Arc<ConfigurationStore>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            loader,
            event_bus,
            metrics,
            supervisor,
            config_store,
            root_scope: Arc::new(ClassScope::root("host")),
            rpc: None,
        }
    }

    async fn entry(&self, name: &str) -> Result<Arc<Mutex<IsolationUnit>>, PluginSystemError> {
        self.entries
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| PluginSystemError::NotFound(name.to_string()))
    }

    fn services(&self) -> Services {
        Services {
            event_bus: Arc::clone(&self.event_bus),
            metrics: Arc::clone(&self.metrics),
            rpc: self.rpc.clone(),
        }
    }

    async fn build_context(&self, name: &str, version: &str) -> PluginContext {
        let bundle = self.config_store.get_bundle(name).await.unwrap_or_default();
        PluginContext::new(name, version, &bundle, self.services())
    }

    async fn do_init(&self, name: &str, unit: &mut IsolationUnit) -> Result<(), PluginSystemError> {
        // LOADED is the precondition for the public `init` entry point
        // (§4.1); FAILED and STOPPED are the states `recover` and
        // `reconcile_config` drive a re-init from internally (recovering
        // a crashed plugin, or regenerating context after a config-driven
        // stop -> init -> start).
        if !matches!(unit.state(), PluginState::Loaded | PluginState::Failed | PluginState::Stopped) {
            return Err(PluginSystemError::PreconditionViolation {
                plugin_name: name.to_string(),
                message: format!("init requires LOADED, FAILED, or STOPPED, found {}", unit.state()),
            });
        }
        let version = unit.plugin().version().to_string();
        let ctx = self.build_context(name, &version).await;
        match unit.plugin().init(ctx).await {
            Ok(()) => {
                unit.set_state(PluginState::Initialized);
                unit.set_desired_state(None);
                Ok(())
            }
            Err(e) => {
                unit.set_state(PluginState::Failed);
                unit.set_desired_state(Some(PluginState::Initialized));
                self.metrics.record_failure(name).await;
                self.supervisor.record_failure(name, e.to_string()).await;
                Err(PluginSystemError::LifecycleFault {
                    plugin_name: name.to_string(),
                    operation: "init".to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn do_start(&self, name: &str, unit: &mut IsolationUnit) -> Result<(), PluginSystemError> {
        if !matches!(unit.state(), PluginState::Initialized | PluginState::Stopped) {
            return Err(PluginSystemError::PreconditionViolation {
                plugin_name: name.to_string(),
                message: format!("start requires INITIALIZED or STOPPED, found {}", unit.state()),
            });
        }
        match unit.plugin().start().await {
            Ok(()) => {
                unit.set_state(PluginState::Started);
                unit.set_desired_state(None);
                self.metrics.record_start(name).await;
                self.supervisor.record_success(name).await;
                self.event_bus.publish(Event::new("PluginStarted", name)).await;
                Ok(())
            }
            Err(e) => {
                unit.set_state(PluginState::Failed);
                unit.set_desired_state(Some(PluginState::Started));
                self.metrics.record_failure(name).await;
                self.supervisor.record_failure(name, e.to_string()).await;
                Err(PluginSystemError::LifecycleFault {
                    plugin_name: name.to_string(),
                    operation: "start".to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn do_stop(&self, name: &str, unit: &mut IsolationUnit) -> Result<(), PluginSystemError> {
        if unit.state() != PluginState::Started {
            return Err(PluginSystemError::PreconditionViolation {
                plugin_name: name.to_string(),
                message: format!("stop requires STARTED, found {}", unit.state()),
            });
        }
        match unit.plugin().stop().await {
            Ok(()) => {
                unit.set_state(PluginState::Stopped);
                self.metrics.record_stop(name).await;
                self.event_bus.publish(Event::new("PluginStopped", name)).await;
                Ok(())
            }
            Err(e) => {
                unit.set_state(PluginState::Failed);
                unit.set_desired_state(Some(PluginState::Stopped));
                self.metrics.record_failure(name).await;
                self.supervisor.record_failure(name, e.to_string()).await;
                Err(PluginSystemError::LifecycleFault {
                    plugin_name: name.to_string(),
                    operation: "stop".to_string(),
                    source: Box::new(e),
                })
            }
        }
    }
}

#[async_trait]
impl PluginRegistry for DefaultPluginRegistry {
    async fn install(&self, name: &str, locator: &str, class_id: &str) -> Result<(), PluginSystemError> {
        if self.entries.read().await.contains_key(name) {
            return Err(PluginSystemError::AlreadyInstalled(name.to_string()));
        }

        let started = Instant::now();
        let artifact = self.loader.resolve(locator).await.map_err(|source| PluginSystemError::ArtifactFault {
            plugin_name: name.to_string(),
            locator: locator.to_string(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        })?;
        let plugin = self.loader.construct(&artifact, class_id)?;

        let scope = ClassScope::child(
            format!("plugin:{name}"),
            Arc::clone(&self.root_scope),
            ResolutionStrategy::ParentFirst,
        );

        self.config_store.load_bundle(name).await.map_err(|e| PluginSystemError::LifecycleFault {
            plugin_name: name.to_string(),
            operation: "load_config".to_string(),
            source: Box::new(e),
        })?;

        {
            let mut entries = self.entries.write().await;
            if entries.contains_key(name) {
                return Err(PluginSystemError::AlreadyInstalled(name.to_string()));
            }
            entries.insert(name.to_string(), Arc::new(Mutex::new(IsolationUnit::new(plugin, scope))));
        }

        self.supervisor.register(name).await;
        self.metrics.record_install_duration(name, started.elapsed()).await;
        self.event_bus.publish(Event::new("PluginInstalled", name)).await;
        Ok(())
    }

    async fn init(&self, name: &str) -> Result<(), PluginSystemError> {
        let entry = self.entry(name).await?;
        let mut unit = entry.lock().await;
        self.do_init(name, &mut unit).await
    }

    async fn start(&self, name: &str) -> Result<(), PluginSystemError> {
        let entry = self.entry(name).await?;
        let mut unit = entry.lock().await;
        self.do_start(name, &mut unit).await
    }

    async fn stop(&self, name: &str) -> Result<(), PluginSystemError> {
        let entry = self.entry(name).await?;
        let mut unit = entry.lock().await;
        self.do_stop(name, &mut unit).await
    }

    async fn unload(&self, name: &str) {
        let entry = match self.entries.write().await.remove(name) {
            Some(entry) => entry,
            None => return,
        };
        let mut unit = entry.lock().await;
        if unit.state() == PluginState::Started {
            if let Err(e) = self.do_stop(name, &mut unit).await {
                log::warn!("best-effort stop during unload of '{name}' failed: {e}");
            }
        }
        unit.plugin().destroy().await;
        unit.set_state(PluginState::Unloaded);
        drop(unit);

        self.config_store.forget(name).await;
        self.supervisor.unregister(name).await;
        self.metrics.record_unload();
    }

    async fn recover(&self, name: &str) -> Result<bool, PluginSystemError> {
        let entry = self.entry(name).await?;
        let mut unit = entry.lock().await;
        let desired = match unit.desired_state() {
            Some(desired) => desired,
            None => return Ok(true),
        };

        if unit.state() != PluginState::Failed {
            return Ok(unit.state() == desired);
        }

        match desired {
            PluginState::Initialized => {
                let _ = self.do_init(name, &mut unit).await;
                Ok(unit.state() == PluginState::Initialized)
            }
            PluginState::Started => {
                if self.do_init(name, &mut unit).await.is_err() {
                    return Ok(false);
                }
                let _ = self.do_start(name, &mut unit).await;
                Ok(unit.state() == PluginState::Started)
            }
            _ => Ok(false),
        }
    }

    async fn reconcile_config(&self, name: &str, _bundle: ConfigBundle) -> Result<(), PluginSystemError> {
        let entry = match self.entries.read().await.get(name).cloned() {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let mut unit = entry.lock().await;
        match unit.state() {
            PluginState::Started => {
                if self.do_stop(name, &mut unit).await.is_err() {
                    return Ok(());
                }
                if self.do_init(name, &mut unit).await.is_err() {
                    return Ok(());
                }
                let _ = self.do_start(name, &mut unit).await;
                Ok(())
            }
            PluginState::Failed => {
                drop(unit);
                self.recover(name).await.map(|_| ())
            }
            _ => Ok(()),
        }
    }

    async fn state(&self, name: &str) -> Option<PluginState> {
        let entry = self.entries.read().await.get(name).cloned()?;
        let unit = entry.lock().await;
        Some(unit.state())
    }

    async fn desired_state(&self, name: &str) -> Option<PluginState> {
        let entry = self.entries.read().await.get(name).cloned()?;
        let unit = entry.lock().await;
        unit.desired_state()
    }

    async fn list_names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

//! The Host: assembles every component in dependency order and owns the
//! startup/shutdown sequence, per §5.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::event::bus::{EventBus, EventBusConfig};
use crate::event::persistence::EventLog;
use crate::kernel::component::{DependencyRegistry, KernelComponent};
use crate::kernel::constants;
use crate::kernel::error::{Error, HostLifecyclePhase, Result};
use crate::metrics::MetricsSink;
use crate::plugin_system::loader::PluginLoader;
use crate::plugin_system::observer::StateObserver;
use crate::plugin_system::registry::{DefaultPluginRegistry, PluginRegistry};
use crate::plugin_system::supervisor::{Supervisor, SupervisorConfig};
use crate::storage::config_store::{ConfigStoreConfig, ConfigurationStore};

/// How long shutdown waits for the Supervisor and the Configuration
/// Store to drain their in-flight work before moving on regardless.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Tunables for every component `Host` wires up, bundled so callers that
/// need non-default timings (tests, mostly) can override them without
/// reaching into each component individually. `Host::new` uses
/// `HostConfig::default()`, which matches every default named in §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostConfig {
    pub event_bus: EventBusConfig,
    pub supervisor: SupervisorConfig,
    pub config_store: ConfigStoreConfig,
}

/// Owns every long-lived component and the order they come up and go
/// down in. Construct with [`Host::new`], then call [`Host::start`]
/// before installing any plugins, and [`Host::shutdown`] exactly once.
pub struct Host {
    config_store: Arc<ConfigurationStore>,
    event_bus: Arc<EventBus>,
    supervisor: Arc<Supervisor>,
    metrics: Arc<MetricsSink>,
    registry: Arc<DefaultPluginRegistry>,
    observer: Arc<StateObserver>,
    components: DependencyRegistry,
    config_change_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

impl Host {
    /// Build every component, wiring the Supervisor's restart callback
    /// back into the Registry. Nothing is started yet; call
    /// [`Host::start`] next.
    pub fn new(base_dir: impl AsRef<Path>, loader: Arc<dyn PluginLoader>) -> Self {
        Self::with_config(base_dir, loader, HostConfig::default())
    }

    /// Like [`Host::new`], but with explicit component tunables. Mainly
    /// useful for tests that need shorter backoff/poll/staleness windows
    /// than the production defaults in §6.
    pub fn with_config(base_dir: impl AsRef<Path>, loader: Arc<dyn PluginLoader>, config: HostConfig) -> Self {
        let base_dir = base_dir.as_ref();

        let config_store = Arc::new(ConfigurationStore::new(base_dir, config.config_store));
        let metrics = Arc::new(MetricsSink::new());
        let event_bus = Arc::new(
            EventBus::new(
                config.event_bus,
                EventLog::new(base_dir.join(constants::EVENTS_DIR_NAME).join(constants::EVENTS_LOG_FILE)),
            )
            .with_metrics(Arc::clone(&metrics)),
        );
        let supervisor = Arc::new(Supervisor::new(config.supervisor));

        let registry = Arc::new(DefaultPluginRegistry::new(
            loader,
            Arc::clone(&event_bus),
            Arc::clone(&metrics),
            Arc::clone(&supervisor),
            Arc::clone(&config_store),
        ));
        let observer = Arc::new(StateObserver::new(registry.clone() as Arc<dyn PluginRegistry>));

        let mut components = DependencyRegistry::new();
        components.register_instance(Arc::clone(&config_store));
        components.register_instance(Arc::clone(&event_bus));
        components.register_instance(Arc::clone(&supervisor));

        Self {
            config_store,
            event_bus,
            supervisor,
            metrics,
            registry,
            observer,
            components,
            config_change_task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn registry(&self) -> Arc<DefaultPluginRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn config_store(&self) -> Arc<ConfigurationStore> {
        Arc::clone(&self.config_store)
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        Arc::clone(&self.supervisor)
    }

    pub fn metrics(&self) -> Arc<MetricsSink> {
        Arc::clone(&self.metrics)
    }

    pub fn components(&self) -> &DependencyRegistry {
        &self.components
    }

    /// Initialize and start every component, then spawn the
    /// Configuration Store's poller and the State Observer's logging
    /// loop (both need `Arc<Self>`, unavailable until the component is
    /// already built here). Also wires the Supervisor's restart
    /// callback to `Registry::recover`, so a scheduled recovery attempt
    /// actually drives the plugin back toward its desired state.
    pub async fn start(&self) -> Result<()> {
        self.config_store.initialize().await.map_err(|e| Error::HostLifecycle {
            phase: HostLifecyclePhase::Initialize,
            message: "configuration store failed to initialize".to_string(),
            source: Some(Box::new(e)),
        })?;
        self.event_bus.initialize().await?;
        self.supervisor.initialize().await?;

        let registry = Arc::clone(&self.registry);
        self.supervisor
            .set_restart_callback(move |name| {
                let registry = Arc::clone(&registry);
                Box::pin(async move { registry.recover(&name).await.unwrap_or(false) })
            })
            .await;

        self.config_store.start().await?;
        self.event_bus.start().await?;
        self.supervisor.start().await?;

        self.config_store.spawn_poller().await;
        self.observer.spawn().await;

        let mut changes = self.config_store.subscribe().await;
        let registry = Arc::clone(&self.registry);
        let handle = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                if let Err(e) = registry.reconcile_config(&change.plugin_name, change.bundle).await {
                    log::warn!("reconcile_config failed for '{}': {e}", change.plugin_name);
                }
            }
        });
        *self.config_change_task.lock().await = Some(handle);

        log::info!("host started");
        Ok(())
    }

    /// Stop components in the order §5 specifies, draining the
    /// Supervisor and the Configuration Store with a bounded timeout,
    /// then unload every remaining plugin best-effort (per-plugin
    /// unload failures are logged, never propagated).
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.config_change_task.lock().await.take() {
            handle.abort();
        }
        self.observer.stop().await?;

        if tokio::time::timeout(SHUTDOWN_DRAIN, self.supervisor.stop()).await.is_err() {
            log::warn!("supervisor did not drain within {:?}, continuing shutdown", SHUTDOWN_DRAIN);
        }

        if tokio::time::timeout(SHUTDOWN_DRAIN, self.config_store.stop()).await.is_err() {
            log::warn!("configuration store did not drain within {:?}, continuing shutdown", SHUTDOWN_DRAIN);
        }

        // No wait: spawned dispatch tasks are simply dropped.
        self.event_bus.stop().await?;

        for name in self.registry.list_names().await {
            self.registry.unload(&name).await;
        }

        log::info!("host shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_system::context::PluginContext;
    use crate::plugin_system::loader::RegistryPluginLoader;
    use crate::plugin_system::traits::{Plugin, PluginError, PluginState};
    use async_trait::async_trait;

    struct Probe;

    #[async_trait]
    impl Plugin for Probe {
        fn name(&self) -> &str {
            "probe"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        async fn init(&self, _ctx: PluginContext) -> std::result::Result<(), PluginError> {
            Ok(())
        }
        async fn start(&self) -> std::result::Result<(), PluginError> {
            Ok(())
        }
        async fn stop(&self) -> std::result::Result<(), PluginError> {
            Ok(())
        }
        async fn destroy(&self) {}
        fn state(&self) -> PluginState {
            PluginState::Loaded
        }
    }

    #[tokio::test]
    async fn start_install_and_shutdown_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = Arc::new(RegistryPluginLoader::new());
        loader.register("mem://probe", "Probe", Arc::new(|| Box::new(Probe) as Box<dyn Plugin>));

        let host = Host::new(dir.path(), loader);
        host.start().await.expect("start");

        host.registry().install("p1", "mem://probe", "Probe").await.expect("install");
        host.registry().init("p1").await.expect("init");
        host.registry().start("p1").await.expect("start plugin");
        assert_eq!(host.registry().state("p1").await, Some(PluginState::Started));

        host.shutdown().await.expect("shutdown");
        assert_eq!(host.registry().state("p1").await, None);
    }
}

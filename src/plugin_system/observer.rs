//! A low-cost diagnostic loop that periodically logs every plugin's
//! current and desired state, per §4.6. Purely observational: it never
//! drives recovery itself, that is the Supervisor's job.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::sync::Mutex;

use crate::kernel::component::KernelComponent;
use crate::kernel::constants;
use crate::kernel::error::Result as KernelResult;
use crate::plugin_system::registry::PluginRegistry;

/// Polls the Registry on an interval and logs `name=CURRENT(desired:X)`
/// for every installed plugin, at `info` level.
pub struct StateObserver {
    registry: Arc<dyn PluginRegistry>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StateObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateObserver").field("interval", &self.interval).finish_non_exhaustive()
    }
}

impl StateObserver {
    pub fn new(registry: Arc<dyn PluginRegistry>) -> Self {
        Self {
            registry,
            interval: Duration::from_millis(constants::DEFAULT_STATE_OBSERVER_INTERVAL_MS),
            handle: Mutex::new(None),
        }
    }

    pub fn with_interval(registry: Arc<dyn PluginRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            handle: Mutex::new(None),
        }
    }

    async fn log_once(&self) {
        for name in self.registry.list_names().await {
            let current = self.registry.state(&name).await;
            let desired = self.registry.desired_state(&name).await;
            match (current, desired) {
                (Some(current), Some(desired)) => {
                    log::info!("{name}={current}(desired:{desired})");
                }
                (Some(current), None) => {
                    log::info!("{name}={current}");
                }
                (None, _) => {
                    // Unloaded between the list and the state lookup; skip it.
                }
            }
        }
    }

    /// Spawn the logging loop. Takes `self` behind an `Arc` since the
    /// loop outlives the call that starts it.
    pub async fn spawn(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.log_once().await;
            }
        });
        *self.handle.lock().await = Some(handle);
    }
}

#[async_trait]
impl KernelComponent for StateObserver {
    fn name(&self) -> &'static str {
        "StateObserver"
    }

    async fn initialize(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        // The loop needs `Arc<Self>`; `Host::start` spawns it once this
        // component is wrapped, the same pattern `ConfigurationStore`
        // and `Supervisor` use.
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

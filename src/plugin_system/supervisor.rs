//! Self-healing control loop: observes lifecycle failures and schedules
//! bounded, exponentially-backed-off restart attempts, per §4.2.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};

use crate::kernel::component::KernelComponent;
use crate::kernel::constants;
use crate::kernel::error::Result as KernelResult;
use crate::plugin_system::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

/// An owned, boxed future, the same shape the teacher's event dispatcher
/// uses for its handler closures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("plugin '{0}' is not registered with the supervisor")]
    NotRegistered(String),
}

/// Per-plugin bookkeeping the Supervisor keeps, per §3's "Recovery record".
#[derive(Debug, Clone, Copy)]
struct RecoveryRecord {
    failure_count: u32,
    last_failure: Instant,
}

/// Tunables, defaulting to the values named in §4.2 and §4.3. Bundled
/// together (rather than threading a separate `CircuitBreakerConfig`
/// through `register`) so callers that need non-default timings, tests
/// mostly, can override backoff and breaker behavior in one place.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_retries: constants::DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(constants::DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(constants::DEFAULT_MAX_BACKOFF_MS),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Computes `min(initial * 2^(counter-1), max)`, per §4.2. `counter` is
/// assumed to be >= 1.
fn backoff_for(counter: u32, cfg: &SupervisorConfig) -> Duration {
    let shift = counter.saturating_sub(1).min(32);
    let scaled = cfg.initial_backoff.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
    scaled.min(cfg.max_backoff)
}

type RestartFn = dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync;
type AlertFn = dyn Fn(String, u32) -> BoxFuture<'static, ()> + Send + Sync;

/// Observes lifecycle failures reported by the Registry and drives
/// recovery back through it. A `KernelComponent` like everything else
/// wired into the host.
pub struct Supervisor {
    config: SupervisorConfig,
    records: Mutex<HashMap<String, RecoveryRecord>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    /// Bounds concurrent scheduled restart attempts, the "fixed-size
    /// scheduled executor" called for in §4.2.
    scheduler: Arc<Semaphore>,
    restart_fn: Mutex<Option<Arc<RestartFn>>>,
    alert_fn: Mutex<Option<Arc<AlertFn>>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            scheduler: Arc::new(Semaphore::new(2)),
            restart_fn: Mutex::new(None),
            alert_fn: Mutex::new(None),
        }
    }

    /// Wire the callback the Registry exposes for "attempt to bring this
    /// plugin back to its desired state". Returns `true` on a successful
    /// restart.
    pub async fn set_restart_callback<F>(&self, f: F)
    where
        F: Fn(String) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        *self.restart_fn.lock().await = Some(Arc::new(f));
    }

    /// Wire the operator-notification callback invoked on give-up.
    pub async fn set_alert_callback<F>(&self, f: F)
    where
        F: Fn(String, u32) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        *self.alert_fn.lock().await = Some(Arc::new(f));
    }

    /// Begin tracking a plugin. Idempotent.
    pub async fn register(&self, name: &str) {
        self.records.lock().await.entry(name.to_string()).or_insert(RecoveryRecord {
            failure_count: 0,
            last_failure: Instant::now(),
        });
        self.breakers
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.circuit_breaker)));
    }

    /// Stop tracking a plugin, e.g. on unload.
    pub async fn unregister(&self, name: &str) {
        self.records.lock().await.remove(name);
        self.breakers.write().await.remove(name);
    }

    /// Current failure counter for a plugin, mostly for tests/diagnostics.
    pub async fn failure_count(&self, name: &str) -> Option<u32> {
        self.records.lock().await.get(name).map(|r| r.failure_count)
    }

    pub async fn circuit_state(&self, name: &str) -> Option<crate::plugin_system::circuit_breaker::CircuitState> {
        self.breakers.read().await.get(name).map(|cb| cb.state())
    }

    /// Record a successful restart/start: resets both the failure
    /// counter and the circuit breaker.
    pub async fn record_success(&self, name: &str) {
        if let Some(record) = self.records.lock().await.get_mut(name) {
            record.failure_count = 0;
        }
        if let Some(cb) = self.breakers.read().await.get(name) {
            cb.record_success();
        }
    }

    /// Record a lifecycle failure and, if within the retry budget,
    /// schedule a backed-off recovery attempt. `self` must be held in an
    /// `Arc` so the scheduled attempt can call back into the Supervisor
    /// (a restart failure re-enters through `record_failure`).
    pub async fn record_failure(self: &Arc<Self>, name: &str, _error: impl Into<String>) {
        let counter = {
            let mut records = self.records.lock().await;
            let record = records.entry(name.to_string()).or_insert(RecoveryRecord {
                failure_count: 0,
                last_failure: Instant::now(),
            });
            record.failure_count += 1;
            record.last_failure = Instant::now();
            record.failure_count
        };

        if let Some(cb) = self.breakers.read().await.get(name) {
            cb.record_failure();
        }

        if counter <= self.config.max_retries {
            let delay = backoff_for(counter, &self.config);
            let this = Arc::clone(self);
            let name = name.to_string();
            tokio::spawn(async move {
                this.run_scheduled_attempt(name, delay).await;
            });
        } else {
            log::warn!("plugin '{name}' exceeded max retries ({}), giving up", self.config.max_retries);
            if let Some(alert) = self.alert_fn.lock().await.clone() {
                alert(name.to_string(), counter).await;
            }
        }
    }

    async fn run_scheduled_attempt(self: Arc<Self>, name: String, delay: Duration) {
        let _permit = self.scheduler.acquire().await.expect("supervisor semaphore closed");
        tokio::time::sleep(delay).await;

        // A breaker denial must not be a dead end: the plugin either has
        // to get its scheduled attempt eventually, or fail it and let
        // `record_failure` push the counter past `max_retries` so the
        // alert callback fires. Silently dropping the attempt here would
        // leave the plugin stuck FAILED forever whenever the breaker is
        // still open when backoff elapses (the common case once the
        // breaker's own failure threshold is at or below max_retries).
        loop {
            let wait = {
                let breakers = self.breakers.read().await;
                let Some(cb) = breakers.get(&name) else { return };
                if cb.allow_request() {
                    None
                } else {
                    Some(cb.time_until_allowed().max(MIN_CIRCUIT_RECHECK))
                }
            };
            match wait {
                None => break,
                Some(wait) => {
                    log::info!("circuit open for '{name}', deferring scheduled recovery attempt for {wait:?}");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        let restart = self.restart_fn.lock().await.clone();
        let Some(restart) = restart else {
            log::warn!("supervisor has no restart callback wired, cannot recover '{name}'");
            return;
        };

        // The restart callback (`Registry::recover`, in practice) drives
        // the plugin back through `init`/`start`, and those already
        // report their own success/failure back to this supervisor.
        // Recording again here would double-count every scheduled
        // attempt against the retry budget.
        restart(name.clone()).await;
    }
}

/// Floor on how long `run_scheduled_attempt` waits between rechecking a
/// denying breaker, guarding against a zero-length busy loop if
/// `time_until_allowed` ever reports an already-elapsed timeout.
const MIN_CIRCUIT_RECHECK: Duration = Duration::from_millis(50);

#[async_trait]
impl KernelComponent for Supervisor {
    fn name(&self) -> &'static str {
        "Supervisor"
    }

    async fn initialize(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        Ok(())
    }
}

//! Type-keyed and wildcard publish/subscribe with asynchronous fan-out
//! dispatch, a bounded dead-letter queue, and on-disk replay, per §4.4.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::event::persistence::EventLog;
use crate::event::types::{DeadLetter, Event, Handler, Subscription, SubscriptionId, WILDCARD};
use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result as KernelResult;
use crate::metrics::MetricsSink;

/// Tunables for an [`EventBus`].
#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    pub dlq_max_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            dlq_max_size: crate::kernel::constants::DEFAULT_DLQ_MAX_SIZE,
        }
    }
}

pub struct EventBus {
    config: EventBusConfig,
    type_subs: RwLock<HashMap<String, Vec<Subscription>>>,
    wildcard_subs: Mutex<Vec<Subscription>>,
    dlq: Mutex<VecDeque<DeadLetter>>,
    next_id: AtomicU64,
    total_dispatched: AtomicU64,
    total_failed: AtomicU64,
    persistence: EventLog,
    persistence_enabled: std::sync::atomic::AtomicBool,
    metrics: Option<Arc<MetricsSink>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("dlq_max_size", &self.config.dlq_max_size)
            .field("persistence_enabled", &self.persistence_enabled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig, persistence: EventLog) -> Self {
        Self {
            config,
            type_subs: RwLock::new(HashMap::new()),
            wildcard_subs: Mutex::new(Vec::new()),
            dlq: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            total_dispatched: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            persistence,
            persistence_enabled: std::sync::atomic::AtomicBool::new(true),
            metrics: None,
        }
    }

    /// Wire a [`MetricsSink`] so every dispatch attempt is also reflected
    /// in the host-wide `events_dispatched`/`events_failed` counters.
    pub fn with_metrics(mut self, metrics: Arc<MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe a handler to an exact event type or [`WILDCARD`].
    /// Returns the subscription's id, unique across the bus's lifetime.
    pub async fn subscribe(&self, type_filter: impl Into<String>, handler: Handler) -> SubscriptionId {
        let type_filter = type_filter.into();
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription {
            id: id.clone(),
            type_filter: type_filter.clone(),
            handler,
        };
        if type_filter == WILDCARD {
            self.wildcard_subs.lock().await.push(subscription);
        } else {
            self.type_subs.write().await.entry(type_filter).or_default().push(subscription);
        }
        id
    }

    /// Unsubscribe by id. A no-op if the id is unknown, per §3.
    pub async fn unsubscribe(&self, id: &SubscriptionId) {
        let mut type_subs = self.type_subs.write().await;
        for subs in type_subs.values_mut() {
            subs.retain(|s| &s.id != id);
        }
        drop(type_subs);
        self.wildcard_subs.lock().await.retain(|s| &s.id != id);
    }

    pub async fn subscription_count(&self) -> usize {
        let type_count: usize = self.type_subs.read().await.values().map(Vec::len).sum();
        let wildcard_count = self.wildcard_subs.lock().await.len();
        type_count + wildcard_count
    }

    /// Publish an event. Persistence is attempted first (failure is
    /// logged and disables persistence for the run, never blocks
    /// dispatch); dispatch then fans out to every matching subscription
    /// on its own spawned task, so handler failures never reach the
    /// caller. `self` must be held in an `Arc` so spawned tasks can
    /// reach the shared dead-letter queue and counters after `publish`
    /// itself returns.
    pub async fn publish(self: &Arc<Self>, event: Event) {
        self.persist_if_enabled(&event).await;

        let mut matching: Vec<Subscription> = self
            .type_subs
            .read()
            .await
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        matching.extend(self.wildcard_subs.lock().await.iter().cloned());

        for subscription in matching {
            let event = event.clone();
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.total_dispatched.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &this.metrics {
                    metrics.record_event_dispatched();
                }
                let subscription_id = subscription.id.clone();
                let result = (subscription.handler)(event.clone()).await;
                if let Err(error) = result {
                    this.total_failed.fetch_add(1, Ordering::Relaxed);
                    if let Some(metrics) = &this.metrics {
                        metrics.record_event_failed();
                    }
                    log::warn!("handler {subscription_id} failed on event '{}': {error}", event.event_type);
                    let mut queue = this.dlq.lock().await;
                    if queue.len() >= this.config.dlq_max_size {
                        queue.pop_front();
                    }
                    queue.push_back(DeadLetter {
                        event,
                        subscription_id,
                        error,
                        failed_at: current_millis(),
                    });
                }
            });
        }
    }

    async fn persist_if_enabled(&self, event: &Event) {
        if !self.persistence_enabled.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.persistence.append(event).await {
            log::error!("event persistence failed, disabling for the remainder of this run: {e}");
            self.persistence_enabled.store(false, Ordering::Relaxed);
        }
    }

    pub async fn dlq_size(&self) -> usize {
        self.dlq.lock().await.len()
    }

    pub fn total_dispatched(&self) -> u64 {
        self.total_dispatched.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    pub async fn clear_dlq(&self) {
        self.dlq.lock().await.clear();
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dlq.lock().await.iter().cloned().collect()
    }

    /// Stream events from the persistence log oldest-first, republishing
    /// those matching `type_filter` (`None` matches everything), up to
    /// `limit` events (`0` = unbounded). This re-persists each republished
    /// event (the richer of the two behaviors the design notes leave
    /// open), so replaying twice duplicates the log; a non-amplifying
    /// mode is left to a future flag rather than built, since nothing in
    /// this crate's test surface needs it yet. Returns the number of
    /// events republished.
    pub async fn replay(
        self: &Arc<Self>,
        type_filter: Option<&str>,
        limit: usize,
    ) -> Result<usize, crate::event::error::EventSystemError> {
        let events = self.persistence.read_all().await?;
        let mut count = 0;
        for event in events {
            if let Some(filter) = type_filter {
                if event.event_type != filter {
                    continue;
                }
            }
            self.publish(event).await;
            count += 1;
            if limit != 0 && count >= limit {
                break;
            }
        }
        Ok(count)
    }

    /// Re-submit up to `limit` (`0` = unbounded) dead-lettered events to
    /// their original event type, draining them from the dead-letter
    /// queue as they are resubmitted. A subsequent handler failure
    /// dead-letters the event again, same as any other dispatch failure.
    pub async fn replay_failed(self: &Arc<Self>, limit: usize) -> usize {
        let drained: Vec<DeadLetter> = {
            let mut queue = self.dlq.lock().await;
            let take = if limit == 0 { queue.len() } else { limit.min(queue.len()) };
            queue.drain(..take).collect()
        };
        let count = drained.len();
        for dead_letter in drained {
            self.publish(dead_letter.event).await;
        }
        count
    }
}

fn current_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl KernelComponent for EventBus {
    fn name(&self) -> &'static str {
        "EventBus"
    }

    async fn initialize(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        // No wait: spawned dispatch tasks are simply dropped, per the
        // shutdown sequence in §5.
        Ok(())
    }
}

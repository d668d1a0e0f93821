//! Concrete event, subscription, and dead-letter types carried by the
//! [`super::bus::EventBus`].
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wildcard type filter matching every published event.
pub const WILDCARD: &str = "*";

/// An immutable event published on the bus. `payload` is a string-keyed
/// map of arbitrary JSON-typed values; `payload()` returns a defensive
/// copy, per the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    /// Milliseconds since epoch, set at construction.
    pub timestamp: i64,
    pub payload: HashMap<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self::with_payload(event_type, source, HashMap::new())
    }

    pub fn with_payload(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: HashMap<String, Value>,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            event_type: event_type.into(),
            source: source.into(),
            timestamp,
            payload,
        }
    }

    /// A defensive copy of the payload, per the data model's invariant.
    pub fn payload(&self) -> HashMap<String, Value> {
        self.payload.clone()
    }
}

/// An owned, boxed future used for handler closures, the same shape the
/// teacher's event dispatcher uses.
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// Handler invoked for a matching event. Returns `Err` to signal the
/// handler failed (the event is then dead-lettered; the error never
/// reaches the publisher).
pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static> + Send + Sync>;

/// Monotonic, prefixed subscription identifier (`sub-<n>`), per the
/// data model. Uniquely identifies a subscription across the bus's
/// lifetime; unsubscribing with an unknown id is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub(crate) fn new(sequence: u64) -> Self {
        Self(format!("sub-{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered subscription: an opaque id, the type filter it matches
/// (an exact type string or [`WILDCARD`]), and its handler.
#[derive(Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub type_filter: String,
    pub handler: Handler,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("type_filter", &self.type_filter)
            .finish_non_exhaustive()
    }
}

/// A failure that fell through to the dead-letter queue: the original
/// event, the subscription whose handler threw, the error, and when it
/// failed.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: Event,
    pub subscription_id: SubscriptionId,
    pub error: String,
    pub failed_at: i64,
}

//! # Pluginhost Event System Errors
//!
//! Defines [`EventSystemError`]. Per the propagation policy, neither
//! variant here ever reaches a publisher: a `DispatchFault` is captured
//! into the dead-letter queue, and a `PersistenceFault` is logged once and
//! disables persistence for the remainder of the run.
use thiserror::Error;

use crate::event::types::SubscriptionId;

#[derive(Debug, Error)]
pub enum EventSystemError {
    /// A subscription's handler panicked or returned an error while
    /// processing an event.
    #[error("handler for subscription {subscription_id} failed on event '{event_type}': {message}")]
    DispatchFault {
        subscription_id: SubscriptionId,
        event_type: String,
        message: String,
    },

    /// Appending an event to the on-disk replay log failed.
    #[error("failed to persist event '{event_type}' to {path}: {source}")]
    PersistenceFault {
        event_type: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A replay log line could not be parsed back into an event.
    #[error("failed to parse replay log entry at {path}:{line}: {source}")]
    ReplayCorrupt {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

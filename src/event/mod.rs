//! # Event Bus
//!
//! Type-keyed and wildcard publish/subscribe, asynchronous fan-out
//! dispatch, a bounded dead-letter queue for handler failures, and an
//! append-only on-disk replay log.
//!
//! - [`types`] — the [`Event`], [`Subscription`](types::Subscription),
//!   and [`DeadLetter`](types::DeadLetter) data model.
//! - [`bus`] — [`EventBus`], the `KernelComponent` that owns subscriber
//!   storage and dispatch.
//! - [`persistence`] — [`EventLog`](persistence::EventLog), the JSONL
//!   replay log.
//! - [`error`] — [`EventSystemError`].
pub mod bus;
pub mod error;
pub mod persistence;
pub mod types;

pub use bus::{EventBus, EventBusConfig};
pub use error::EventSystemError;
pub use persistence::EventLog;
pub use types::{DeadLetter, Event, Handler, Subscription, SubscriptionId, WILDCARD};

//! # Kernel
//!
//! The host's foundation: the [`KernelComponent`](component::KernelComponent)
//! lifecycle trait every long-lived piece implements, the
//! [`Host`](host::Host) that assembles them in dependency order and owns
//! the startup/shutdown sequence, shared constants, and the crate-wide
//! [`Error`](error::Error) type.
pub mod component;
pub mod constants;
pub mod error;
pub mod host;

pub use component::{DependencyRegistry, KernelComponent};
pub use error::{Error, Result};
pub use host::{Host, HostConfig};
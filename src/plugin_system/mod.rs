//! # Plugin System
//!
//! The host's pluggable-module infrastructure: the [`Plugin`] contract,
//! the [`registry::PluginRegistry`] that drives every plugin through its
//! lifecycle state machine, the [`supervisor::Supervisor`] and
//! [`circuit_breaker::CircuitBreaker`] that self-heal crashed plugins,
//! the [`observer::StateObserver`] diagnostic loop, and the
//! [`loader::PluginLoader`]/[`isolation`] abstractions standing in for
//! artifact loading and classloader-style resolution scopes.
pub mod circuit_breaker;
pub mod context;
pub mod error;
pub mod isolation;
pub mod loader;
pub mod observer;
pub mod registry;
pub mod supervisor;
pub mod traits;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use context::{ConfigReader, PluginContext, SecretsReader, Services};
pub use error::PluginSystemError;
pub use isolation::{ClassScope, IsolationUnit, ResolutionStrategy};
pub use loader::{ArtifactHandle, PluginLoader, RegistryPluginLoader};
pub use observer::StateObserver;
pub use registry::{DefaultPluginRegistry, PluginRegistry};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError};
pub use traits::{Plugin, PluginError, PluginState};
//! # Storage
//!
//! The plugin-facing [`config_store::ConfigurationStore`], which persists
//! per-plugin configuration and secrets and polls for external edits.
pub mod config_store;
pub mod error;

pub use config_store::{ConfigBundle, ConfigChange, ConfigurationStore};
pub use error::StorageSystemError;

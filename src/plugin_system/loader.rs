//! Artifact-loading abstraction the Registry's `install` depends on. No
//! dynamic library loading or JAR-discovery walker is implemented here
//! (both out of scope); [`RegistryPluginLoader`] resolves artifacts that
//! were registered ahead of time, the in-process equivalent called out
//! as an acceptable strategy for the loader boundary.
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::isolation::ConstructorFactory;
use crate::plugin_system::traits::Plugin;

/// Opaque handle to a resolved artifact. Carries only what the default
/// loader needs; a real dynamic-loading implementation would instead
/// carry a library handle or similar.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    locator: String,
}

impl ArtifactHandle {
    pub fn locator(&self) -> &str {
        &self.locator
    }
}

/// Resolves an artifact locator to a loadable handle, then constructs a
/// named class out of it. The Registry never loads code itself; it only
/// calls through this trait.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn resolve(&self, locator: &str) -> Result<ArtifactHandle, PluginSystemError>;
    fn construct(&self, artifact: &ArtifactHandle, class_id: &str) -> Result<Box<dyn Plugin>, PluginSystemError>;
}

/// Ahead-of-time registration loader: artifacts are (locator, class id)
/// pairs mapped to a constructor closure, registered before any
/// `install` call that needs them. This is how the fixtures and
/// integration tests install plugins without a real filesystem artifact
/// or dynamic library.
#[derive(Default)]
pub struct RegistryPluginLoader {
    artifacts: RwLock<HashMap<String, HashMap<String, ConstructorFactory>>>,
}

impl std::fmt::Debug for RegistryPluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.artifacts.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("RegistryPluginLoader").field("artifact_count", &count).finish()
    }
}

impl RegistryPluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `class_id` under artifact `locator`.
    /// Subsequent `install(name, locator, class_id)` calls can resolve it.
    pub fn register(
        &self,
        locator: impl Into<String>,
        class_id: impl Into<String>,
        factory: ConstructorFactory,
    ) {
        let mut artifacts = self.artifacts.write().expect("loader registry poisoned");
        artifacts
            .entry(locator.into())
            .or_default()
            .insert(class_id.into(), factory);
    }
}

#[async_trait]
impl PluginLoader for RegistryPluginLoader {
    async fn resolve(&self, locator: &str) -> Result<ArtifactHandle, PluginSystemError> {
        let artifacts = self.artifacts.read().expect("loader registry poisoned");
        if artifacts.contains_key(locator) {
            Ok(ArtifactHandle {
                locator: locator.to_string(),
            })
        } else {
            Err(PluginSystemError::UnknownArtifact(locator.to_string()))
        }
    }

    fn construct(&self, artifact: &ArtifactHandle, class_id: &str) -> Result<Box<dyn Plugin>, PluginSystemError> {
        let artifacts = self.artifacts.read().expect("loader registry poisoned");
        let classes = artifacts.get(artifact.locator()).ok_or_else(|| {
            PluginSystemError::UnknownArtifact(artifact.locator().to_string())
        })?;
        let factory = classes.get(class_id).ok_or_else(|| PluginSystemError::ContractViolation {
            plugin_name: artifact.locator().to_string(),
            class_id: class_id.to_string(),
            message: "no constructor registered for this class id".to_string(),
        })?;
        Ok(factory())
    }
}

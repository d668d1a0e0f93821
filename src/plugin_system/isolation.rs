//! The Isolation Unit: owns a single plugin instance and its private
//! resources, and the class-resolution scope standing in for a
//! classloader.
use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin_system::traits::{Plugin, PluginState};

/// Order in which a [`ClassScope`] resolves a symbol against its own
/// table versus its parent's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionStrategy {
    /// Delegate to the parent scope first; fall back to the local table.
    /// The default, matching §3.
    #[default]
    ParentFirst,
    /// Prefer the local table; fall back to the parent scope.
    ChildFirst,
}

/// Constructor factory for a plugin class: a boxed closure producing a
/// fresh `Box<dyn Plugin>`.
pub type ConstructorFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// A named, closeable resource standing in for a classloader's
/// resolution scope. Holds a small symbol table of constructor
/// factories plus an optional parent scope to delegate to. Invariant:
/// no two isolation units share a `ClassScope`; dropping one clears its
/// table, modeling release of the loaded code.
#[derive(Clone)]
pub struct ClassScope {
    name: String,
    strategy: ResolutionStrategy,
    parent: Option<Arc<ClassScope>>,
    symbols: HashMap<String, ConstructorFactory>,
}

impl std::fmt::Debug for ClassScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassScope")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("has_parent", &self.parent.is_some())
            .field("symbol_count", &self.symbols.len())
            .finish()
    }
}

impl ClassScope {
    /// The host's own root scope: no parent, an empty table.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: ResolutionStrategy::ParentFirst,
            parent: None,
            symbols: HashMap::new(),
        }
    }

    /// A child scope delegating to `parent` per `strategy`.
    pub fn child(
        name: impl Into<String>,
        parent: Arc<ClassScope>,
        strategy: ResolutionStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            strategy,
            parent: Some(parent),
            symbols: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contribute a named constructor to this scope's own table (not the
    /// parent's).
    pub fn define(&mut self, class_id: impl Into<String>, factory: ConstructorFactory) {
        self.symbols.insert(class_id.into(), factory);
    }

    /// Resolve a class id to a constructor, honoring this scope's
    /// resolution order.
    pub fn resolve(&self, class_id: &str) -> Option<ConstructorFactory> {
        match self.strategy {
            ResolutionStrategy::ParentFirst => self
                .parent
                .as_ref()
                .and_then(|p| p.resolve(class_id))
                .or_else(|| self.symbols.get(class_id).cloned()),
            ResolutionStrategy::ChildFirst => self
                .symbols
                .get(class_id)
                .cloned()
                .or_else(|| self.parent.as_ref().and_then(|p| p.resolve(class_id))),
        }
    }
}

/// Owns a single plugin instance and its private resources: current and
/// desired state, and its own class-resolution scope. The plugin
/// instance is exclusively owned by the unit.
pub struct IsolationUnit {
    plugin: Box<dyn Plugin>,
    current_state: PluginState,
    desired_state: Option<PluginState>,
    scope: ClassScope,
}

impl std::fmt::Debug for IsolationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationUnit")
            .field("current_state", &self.current_state)
            .field("desired_state", &self.desired_state)
            .field("scope", &self.scope.name())
            .finish()
    }
}

impl IsolationUnit {
    pub fn new(plugin: Box<dyn Plugin>, scope: ClassScope) -> Self {
        Self {
            plugin,
            current_state: PluginState::Loaded,
            desired_state: None,
            scope,
        }
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    pub fn state(&self) -> PluginState {
        self.current_state
    }

    pub fn set_state(&mut self, state: PluginState) {
        self.current_state = state;
    }

    pub fn desired_state(&self) -> Option<PluginState> {
        self.desired_state
    }

    pub fn set_desired_state(&mut self, state: Option<PluginState>) {
        self.desired_state = state;
    }

    pub fn scope(&self) -> &ClassScope {
        &self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_system::traits::PluginError;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Plugin for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn version(&self) -> &str {
            "0.0.0"
        }
        async fn init(&self, _ctx: crate::plugin_system::context::PluginContext) -> Result<(), PluginError> {
            Ok(())
        }
        async fn start(&self) -> Result<(), PluginError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), PluginError> {
            Ok(())
        }
        async fn destroy(&self) {}
        fn state(&self) -> PluginState {
            PluginState::Loaded
        }
    }

    #[test]
    fn parent_first_prefers_parent_symbol() {
        let mut root = ClassScope::root("host");
        root.define("widget", Arc::new(|| Box::new(Noop) as Box<dyn Plugin>));
        let root = Arc::new(root);
        let mut child = ClassScope::child("plugin-a", root.clone(), ResolutionStrategy::ParentFirst);
        child.define("widget", Arc::new(|| Box::new(Noop) as Box<dyn Plugin>));
        assert!(child.resolve("widget").is_some());
        assert!(child.resolve("missing").is_none());
    }

    #[test]
    fn child_first_prefers_own_symbol_when_present() {
        let root = Arc::new(ClassScope::root("host"));
        let mut child = ClassScope::child("plugin-a", root, ResolutionStrategy::ChildFirst);
        child.define("gadget", Arc::new(|| Box::new(Noop) as Box<dyn Plugin>));
        assert!(child.resolve("gadget").is_some());
    }
}

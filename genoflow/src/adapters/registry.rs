//! Registry resolving adapter names to runners.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::TaskRunner;
use crate::core::PipelineDefinition;
use crate::errors::OrchestratorError;

/// Maps adapter names used in task definitions to runner instances.
#[derive(Default)]
pub struct AdapterRegistry {
    runners: RwLock<HashMap<String, Arc<dyn TaskRunner>>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runner under a name, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, runner: Arc<dyn TaskRunner>) {
        self.runners.write().insert(name.into(), runner);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(self, name: impl Into<String>, runner: Arc<dyn TaskRunner>) -> Self {
        self.register(name, runner);
        self
    }

    /// Registers one runner under every adapter name a pipeline references.
    #[must_use]
    pub fn uniform(definition: &PipelineDefinition, runner: Arc<dyn TaskRunner>) -> Self {
        let registry = Self::new();
        for name in definition.adapter_names() {
            registry.register(name, runner.clone());
        }
        registry
    }

    /// Looks up a runner by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn TaskRunner>, OrchestratorError> {
        self.runners
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::AdapterNotFound(name.to_string()))
    }

    /// Returns true if a runner is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.runners.read().contains_key(name)
    }

    /// Registered adapter names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.runners.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Fails if any adapter referenced by the pipeline is missing.
    pub fn ensure_resolves(&self, definition: &PipelineDefinition) -> Result<(), OrchestratorError> {
        let runners = self.runners.read();
        let mut missing: Vec<_> = definition
            .adapter_names()
            .into_iter()
            .filter(|name| !runners.contains_key(*name))
            .collect();
        missing.sort_unstable();
        match missing.first() {
            Some(name) => Err(OrchestratorError::AdapterNotFound((*name).to_string())),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTaskRunner;
    use crate::core::{StageDefinition, TaskDefinition};

    fn definition() -> PipelineDefinition {
        PipelineDefinition::new(
            "p",
            vec![StageDefinition::new(0, "a")
                .with_task(TaskDefinition::new("t1", "salmon"))
                .with_task(TaskDefinition::new("t2", "deseq2"))],
        )
        .unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let registry = AdapterRegistry::new().with("salmon", Arc::new(MockTaskRunner::new()));
        assert!(registry.contains("salmon"));
        assert!(registry.get("salmon").is_ok());
        assert!(matches!(
            registry.get("missing"),
            Err(OrchestratorError::AdapterNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_ensure_resolves_reports_missing_adapter() {
        let registry = AdapterRegistry::new().with("salmon", Arc::new(MockTaskRunner::new()));
        let err = registry.ensure_resolves(&definition()).unwrap_err();
        assert!(matches!(err, OrchestratorError::AdapterNotFound(name) if name == "deseq2"));
    }

    #[test]
    fn test_uniform_registers_every_reference() {
        let registry = AdapterRegistry::uniform(&definition(), Arc::new(MockTaskRunner::new()));
        assert_eq!(registry.names(), vec!["deseq2", "salmon"]);
        assert!(registry.ensure_resolves(&definition()).is_ok());
    }
}

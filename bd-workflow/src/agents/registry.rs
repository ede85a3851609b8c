use std::collections::BTreeMap;

use crate::error::{CoordinationError, Result};
use crate::state::AgentType;

use super::documentation::DocumentationAgent;
use super::poc::PocAgent;
use super::research::ResearchAgent;
use super::validation::ValidationAgent;
use super::Agent;

type AgentFactory = Box<dyn Fn(String) -> Box<dyn Agent> + Send + Sync>;

/// Maps agent types to constructors for their implementations.
pub struct Registry {
    factories: BTreeMap<AgentType, AgentFactory>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the four built-in agents.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(AgentType::Research, |id| Box::new(ResearchAgent::new(id)));
        registry.register(AgentType::Poc, |id| Box::new(PocAgent::new(id)));
        registry.register(AgentType::Documentation, |id| Box::new(DocumentationAgent::new(id)));
        registry.register(AgentType::Validation, |id| Box::new(ValidationAgent::new(id)));
        registry
    }

    /// Register or replace the implementation for `agent_type`.
    pub fn register<F>(&mut self, agent_type: AgentType, factory: F)
    where
        F: Fn(String) -> Box<dyn Agent> + Send + Sync + 'static,
    {
        self.factories.insert(agent_type, Box::new(factory));
    }

    /// Build an agent instance with the given id.
    pub fn get(&self, agent_type: AgentType, agent_id: impl Into<String>) -> Result<Box<dyn Agent>> {
        let factory = self
            .factories
            .get(&agent_type)
            .ok_or_else(|| CoordinationError::UnknownAgentType(agent_type.to_string()))?;
        Ok(factory(agent_id.into()))
    }

    pub fn types(&self) -> Vec<AgentType> {
        self.factories.keys().copied().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// `{type}-agent-{8 hex}`.
pub fn generate_agent_id(agent_type: AgentType) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-agent-{}", agent_type, &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_all_types() {
        let registry = Registry::with_builtin();
        assert_eq!(registry.types(), AgentType::ALL.to_vec());
        for t in AgentType::ALL {
            let agent = registry.get(t, "x").unwrap();
            assert_eq!(agent.agent_type(), t);
            assert_eq!(agent.id(), "x");
            assert!(!agent.steps().is_empty());
        }
    }

    #[test]
    fn test_empty_registry_rejects_lookup() {
        let err = Registry::new().get(AgentType::Poc, "poc-1").err().unwrap();
        assert!(matches!(err, CoordinationError::UnknownAgentType(ref t) if t == "poc"));
    }

    #[test]
    fn test_generate_agent_id_format() {
        let id = generate_agent_id(AgentType::Documentation);
        assert!(id.starts_with("documentation-agent-"));
        assert_eq!(id.len(), "documentation-agent-".len() + 8);
    }
}

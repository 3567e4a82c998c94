//! Discriminator → factory table used to build nodes by type name.

use crate::config::EngineConfig;
use crate::container::{ConditionNode, InstructionNode, SequenceContainer};
use crate::error::{Result, SequenceError};
use crate::node::{Condition, Instruction, Trigger};
use crate::types::EntityKind;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type ContainerFactory = Arc<dyn Fn() -> SequenceContainer + Send + Sync>;
pub type InstructionFactory = Arc<dyn Fn() -> Box<dyn Instruction> + Send + Sync>;
pub type ConditionFactory = Arc<dyn Fn() -> Box<dyn Condition> + Send + Sync>;
pub type TriggerFactory = Arc<dyn Fn() -> Box<dyn Trigger> + Send + Sync>;

// ---------------------------------------------------------------------------
// NodeFactory
// ---------------------------------------------------------------------------

/// Produces a fresh, default-configured node of one concrete type.
#[derive(Clone)]
pub enum NodeFactory {
    Container(ContainerFactory),
    Instruction(InstructionFactory),
    Condition(ConditionFactory),
    Trigger(TriggerFactory),
}

impl NodeFactory {
    pub fn kind(&self) -> EntityKind {
        match self {
            NodeFactory::Container(_) => EntityKind::Container,
            NodeFactory::Instruction(_) => EntityKind::Instruction,
            NodeFactory::Condition(_) => EntityKind::Condition,
            NodeFactory::Trigger(_) => EntityKind::Trigger,
        }
    }
}

impl fmt::Debug for NodeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeFactory::{}", self.kind())
    }
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

/// Registration is explicit. Nothing is discovered at runtime; a type that
/// was never registered cannot be loaded.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    factories: BTreeMap<String, NodeFactory>,
    default_attempts: u32,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        NodeRegistry {
            factories: BTreeMap::new(),
            default_attempts: 1,
        }
    }

    /// A registry holding every built-in node type, configured from `config`.
    pub fn with_builtins(config: &EngineConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.default_attempts = config.defaults.attempts.max(1);
        crate::nodes::register_builtins(&mut registry, &config.defaults)?;
        Ok(registry)
    }

    pub fn register(&mut self, discriminator: &str, factory: NodeFactory) -> Result<()> {
        if self.factories.contains_key(discriminator) {
            return Err(SequenceError::DuplicateType(discriminator.to_string()));
        }
        self.factories.insert(discriminator.to_string(), factory);
        Ok(())
    }

    pub fn register_container<F>(&mut self, discriminator: &str, factory: F) -> Result<()>
    where
        F: Fn() -> SequenceContainer + Send + Sync + 'static,
    {
        self.register(discriminator, NodeFactory::Container(Arc::new(factory)))
    }

    pub fn register_instruction<I, F>(&mut self, discriminator: &str, factory: F) -> Result<()>
    where
        I: Instruction + 'static,
        F: Fn() -> I + Send + Sync + 'static,
    {
        self.register(
            discriminator,
            NodeFactory::Instruction(Arc::new(move || Box::new(factory()) as Box<dyn Instruction>)),
        )
    }

    pub fn register_condition<C, F>(&mut self, discriminator: &str, factory: F) -> Result<()>
    where
        C: Condition + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.register(
            discriminator,
            NodeFactory::Condition(Arc::new(move || Box::new(factory()) as Box<dyn Condition>)),
        )
    }

    pub fn register_trigger<T, F>(&mut self, discriminator: &str, factory: F) -> Result<()>
    where
        T: Trigger + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register(
            discriminator,
            NodeFactory::Trigger(Arc::new(move || Box::new(factory()) as Box<dyn Trigger>)),
        )
    }

    pub fn get(&self, discriminator: &str) -> Result<&NodeFactory> {
        self.factories
            .get(discriminator)
            .ok_or_else(|| SequenceError::UnknownType(discriminator.to_string()))
    }

    pub fn kind_of(&self, discriminator: &str) -> Option<EntityKind> {
        self.factories.get(discriminator).map(NodeFactory::kind)
    }

    pub fn contains(&self, discriminator: &str) -> bool {
        self.factories.contains_key(discriminator)
    }

    /// Every registered discriminator with its kind, sorted by name.
    pub fn discriminators(&self) -> Vec<(&str, EntityKind)> {
        self.factories
            .iter()
            .map(|(name, factory)| (name.as_str(), factory.kind()))
            .collect()
    }

    pub fn default_attempts(&self) -> u32 {
        self.default_attempts
    }

    // -- construction -------------------------------------------------------

    /// A fresh container carrying `discriminator`, whatever the factory set.
    pub fn create_container(&self, discriminator: &str) -> Result<SequenceContainer> {
        match self.get(discriminator)? {
            NodeFactory::Container(factory) => {
                let mut container = factory();
                container.discriminator = discriminator.to_string();
                Ok(container)
            }
            other => Err(wrong_kind(discriminator, EntityKind::Container, other)),
        }
    }

    pub fn create_instruction(&self, discriminator: &str) -> Result<InstructionNode> {
        match self.get(discriminator)? {
            NodeFactory::Instruction(factory) => {
                Ok(InstructionNode::from_boxed(factory()).with_attempts(self.default_attempts))
            }
            other => Err(wrong_kind(discriminator, EntityKind::Instruction, other)),
        }
    }

    pub fn create_condition(&self, discriminator: &str) -> Result<ConditionNode> {
        match self.get(discriminator)? {
            NodeFactory::Condition(factory) => Ok(ConditionNode::from_boxed(factory())),
            other => Err(wrong_kind(discriminator, EntityKind::Condition, other)),
        }
    }

    /// Trigger logic only; the caller supplies the sub-sequence.
    pub fn create_trigger(&self, discriminator: &str) -> Result<Box<dyn Trigger>> {
        match self.get(discriminator)? {
            NodeFactory::Trigger(factory) => Ok(factory()),
            other => Err(wrong_kind(discriminator, EntityKind::Trigger, other)),
        }
    }
}

fn wrong_kind(discriminator: &str, expected: EntityKind, found: &NodeFactory) -> SequenceError {
    SequenceError::WrongKind {
        discriminator: discriminator.to_string(),
        expected,
        actual: found.kind(),
    }
}

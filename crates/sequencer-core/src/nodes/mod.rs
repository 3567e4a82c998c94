//! Built-in node types and their registration.

pub mod conditions;
pub mod instructions;
pub mod triggers;

use crate::config::NodeDefaults;
use crate::container::{ContainerSettings, SequenceContainer};
use crate::error::Result;
use crate::registry::NodeRegistry;
use crate::types::{ExecutionStrategy, Target};

fn settings(defaults: &NodeDefaults, strategy: ExecutionStrategy) -> ContainerSettings {
    ContainerSettings {
        failure_policy: defaults.failure_policy,
        strategy,
        condition_mode: defaults.condition_mode,
        target: None,
    }
}

/// Registers every built-in container, instruction, condition and trigger.
pub fn register_builtins(registry: &mut NodeRegistry, defaults: &NodeDefaults) -> Result<()> {
    let sequential = settings(defaults, ExecutionStrategy::Sequential);
    registry.register_container(SequenceContainer::SEQUENTIAL, move || {
        SequenceContainer::new(SequenceContainer::SEQUENTIAL, "Sequence", sequential.clone())
    })?;

    let parallel = settings(defaults, ExecutionStrategy::Parallel);
    registry.register_container(SequenceContainer::PARALLEL, move || {
        SequenceContainer::new(SequenceContainer::PARALLEL, "Parallel", parallel.clone())
    })?;

    let target = ContainerSettings {
        target: Some(Target::new("Target", 0.0, 0.0)),
        ..settings(defaults, ExecutionStrategy::Sequential)
    };
    registry.register_container(SequenceContainer::TARGET, move || {
        SequenceContainer::new(SequenceContainer::TARGET, "Target", target.clone())
    })?;

    registry.register_instruction(instructions::Wait::TYPE, instructions::Wait::default)?;
    registry.register_instruction(
        instructions::LogMessage::TYPE,
        instructions::LogMessage::default,
    )?;
    registry.register_instruction(instructions::SetState::TYPE, instructions::SetState::default)?;
    registry.register_instruction(instructions::Fail::TYPE, instructions::Fail::default)?;

    registry.register_condition(conditions::Constant::TYPE, conditions::Constant::default)?;
    registry.register_condition(conditions::BeforeTime::TYPE, conditions::BeforeTime::default)?;
    registry.register_condition(
        conditions::StateCompare::TYPE,
        conditions::StateCompare::default,
    )?;

    registry.register_trigger(triggers::AfterEntity::TYPE, triggers::AfterEntity::default)?;
    registry.register_trigger(triggers::StateDrift::TYPE, triggers::StateDrift::default)?;
    registry.register_trigger(triggers::Interval::TYPE, triggers::Interval::default)?;

    Ok(())
}

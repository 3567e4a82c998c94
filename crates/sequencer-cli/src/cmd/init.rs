use crate::output::print_json;
use crate::session::Session;
use anyhow::Context;
use sequencer_core::nodes::conditions::{CompareOp, StateCompare};
use sequencer_core::nodes::instructions::{LogMessage, SetState, Wait};
use sequencer_core::nodes::triggers::AfterEntity;
use sequencer_core::{
    ConditionNode, InstructionNode, SequenceContainer, SequenceRootContainer, Target, TriggerNode,
};
use std::path::Path;

/// Name of the target block in the starter document.
const STARTER_TARGET: &str = "M31";

pub fn run(config: &Path, file: &Path, name: &str, force: bool, json: bool) -> anyhow::Result<()> {
    if file.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", file.display());
    }

    let session = Session::load(config)?;
    let root = starter(name)?;
    session
        .codec()
        .save(&root, file)
        .with_context(|| format!("failed to write {}", file.display()))?;

    if json {
        print_json(&serde_json::json!({
            "file": file.display().to_string(),
            "name": root.name(),
            "entities": root.entity_count(),
        }))?;
    } else {
        println!("created: {} ({} entities)", file.display(), root.entity_count());
    }
    Ok(())
}

/// A small sequence exercising each node kind: a log line, a target block
/// gated on `altitude`, and a global trigger that reacts once the target
/// block finishes.
fn starter(name: &str) -> anyhow::Result<SequenceRootContainer> {
    let mut root = SequenceRootContainer::new(name);
    root.add(InstructionNode::new(LogMessage::new(format!("Starting {name}"))).named("Announce"))?;

    let target = SequenceContainer::target(
        STARTER_TARGET,
        Target::new("M31 Andromeda Galaxy", 0.712, 41.269),
    )
    .with_condition(
        ConditionNode::new(StateCompare::new("altitude", CompareOp::Ge, 30.0))
            .named("Above 30 degrees"),
    )
    .with(InstructionNode::new(SetState::new("last_target", STARTER_TARGET)).named("Record target"))
    .with(InstructionNode::new(Wait::new(0.2)).named("Settle"));
    root.add(target)?;

    root.attach_trigger(
        TriggerNode::new(
            AfterEntity::new(STARTER_TARGET),
            SequenceContainer::sequential("After target")
                .with(InstructionNode::new(LogMessage::new("Target complete")).named("Report")),
        )
        .named("Target finished"),
    )?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequencer_core::EngineConfig;

    #[test]
    fn starter_is_valid_and_encodable() {
        let root = starter("Test night").unwrap();
        assert!(root.validate().is_empty());
        assert_eq!(root.triggers().len(), 1);

        let session = Session {
            config: EngineConfig::default(),
            registry: sequencer_core::NodeRegistry::with_builtins(&EngineConfig::default())
                .unwrap(),
        };
        let yaml = session.codec().to_yaml(&root).unwrap();
        assert!(yaml.contains("container.target"));
        assert!(yaml.contains("trigger.after_entity"));
    }
}

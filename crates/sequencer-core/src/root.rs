use crate::container::{
    ConditionNode, Entity, SequenceContainer, SequenceItem, TriggerNode, ValidationIssue,
};
use crate::context::RunContext;
use crate::engine::{GlobalTriggers, Scope};
use crate::error::{Result, SequenceError};
use crate::types::{EntityId, EntityStatus};
use chrono::Utc;
use std::collections::HashSet;
use tracing::warn;

/// The top of a sequence tree.
///
/// Triggers attached here are global: they are checked after every step of
/// every container in the tree, not just after the root's own children.
#[derive(Debug, Clone)]
pub struct SequenceRootContainer {
    container: SequenceContainer,
    triggers: Vec<TriggerNode>,
}

impl SequenceRootContainer {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_container(SequenceContainer::sequential(name))
    }

    /// Wraps `container`, promoting its triggers to global triggers.
    pub fn from_container(mut container: SequenceContainer) -> Self {
        container.meta.parent = None;
        let triggers = std::mem::take(&mut container.triggers);
        SequenceRootContainer {
            container,
            triggers,
        }
    }

    pub fn container(&self) -> &SequenceContainer {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut SequenceContainer {
        &mut self.container
    }

    pub fn id(&self) -> EntityId {
        self.container.id()
    }

    pub fn name(&self) -> &str {
        self.container.name()
    }

    pub fn status(&self) -> EntityStatus {
        self.container.status()
    }

    pub fn items(&self) -> &[SequenceItem] {
        self.container.items()
    }

    /// Global triggers.
    pub fn triggers(&self) -> &[TriggerNode] {
        &self.triggers
    }

    // -- queries ------------------------------------------------------------

    /// Visits the root container's subtree, then each global trigger and its
    /// sub-sequence.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a dyn Entity, usize)) {
        self.container.walk(visit);
        for trigger in &self.triggers {
            trigger.walk(1, visit);
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.find(id).is_some()
    }

    pub fn find(&self, id: EntityId) -> Option<&dyn Entity> {
        let mut found: Option<&dyn Entity> = None;
        self.walk(&mut |entity, _| {
            if found.is_none() && entity.id() == id {
                found = Some(entity);
            }
        });
        found
    }

    pub fn status_of(&self, id: EntityId) -> Option<EntityStatus> {
        self.find(id).map(|e| e.status())
    }

    pub fn entity_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_, _| count += 1);
        count
    }

    pub fn targets(&self) -> Vec<&SequenceContainer> {
        self.container.targets()
    }

    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        self.walk(&mut |entity, _| {
            if !seen.insert(entity.id()) {
                issues.push(ValidationIssue::of(entity, "duplicate entity id"));
            }
        });
        self.container.collect_issues(&mut issues);
        for trigger in &self.triggers {
            trigger.collect_issues(&mut issues);
        }
        issues
    }

    fn first_running(&self) -> Option<EntityId> {
        let mut running = None;
        self.walk(&mut |entity, _| {
            if running.is_none() && entity.status() == EntityStatus::Running {
                running = Some(entity.id());
            }
        });
        running
    }

    fn find_item(&self, id: EntityId) -> Option<&SequenceItem> {
        self.container.find_item(id).or_else(|| {
            self.triggers
                .iter()
                .find_map(|t| t.sequence.find_item(id))
        })
    }

    fn find_container_mut(&mut self, id: EntityId) -> Option<&mut SequenceContainer> {
        if let Some(found) = self.container.find_container_mut(id) {
            return Some(found);
        }
        self.triggers
            .iter_mut()
            .find_map(|t| t.sequence.find_container_mut(id))
    }

    fn ensure_absent(&self, ids: Vec<EntityId>) -> Result<()> {
        match ids.into_iter().find(|id| self.contains(*id)) {
            Some(id) => Err(SequenceError::DuplicateEntity(id)),
            None => Ok(()),
        }
    }

    // -- editing ------------------------------------------------------------

    pub fn add(&mut self, item: impl Into<SequenceItem>) -> Result<EntityId> {
        let parent = self.id();
        self.insert_into(parent, None, item)
    }

    /// Inserts `item` into the container `parent`, which may live anywhere
    /// in the tree, at `index` or at the end.
    pub fn insert_into(
        &mut self,
        parent: EntityId,
        index: Option<usize>,
        item: impl Into<SequenceItem>,
    ) -> Result<EntityId> {
        let item = item.into();
        let mut ids = Vec::new();
        item.walk(0, &mut |entity, _| ids.push(entity.id()));
        self.ensure_absent(ids)?;
        let container = self
            .find_container_mut(parent)
            .ok_or(SequenceError::EntityNotFound(parent))?;
        let index = index.unwrap_or(container.items.len());
        container.insert(index, item)
    }

    pub fn remove(&mut self, id: EntityId) -> Result<SequenceItem> {
        if let Ok(item) = self.container.remove(id) {
            return Ok(item);
        }
        for trigger in self.triggers.iter_mut() {
            if let Ok(item) = trigger.sequence.remove(id) {
                return Ok(item);
            }
        }
        Err(SequenceError::EntityNotFound(id))
    }

    /// Re-parents the item `id` under the container `new_parent`. Either
    /// may live in a global trigger's sub-sequence.
    pub fn move_entity(
        &mut self,
        id: EntityId,
        new_parent: EntityId,
        index: Option<usize>,
    ) -> Result<()> {
        let subject = self
            .find_item(id)
            .ok_or(SequenceError::EntityNotFound(id))?;
        if subject.contains(new_parent) {
            return Err(SequenceError::CyclicAttachment { entity: id });
        }
        if self.find_container_mut(new_parent).is_none() {
            return Err(SequenceError::EntityNotFound(new_parent));
        }
        let item = self.remove(id)?;
        let parent = self
            .find_container_mut(new_parent)
            .ok_or(SequenceError::EntityNotFound(new_parent))?;
        let index = index.unwrap_or(parent.items.len());
        parent.insert(index, item).map(|_| ())
    }

    /// Attaches a condition to the container `owner`.
    pub fn attach_condition(
        &mut self,
        owner: EntityId,
        condition: ConditionNode,
    ) -> Result<EntityId> {
        if self.contains(condition.id()) {
            return Err(SequenceError::DuplicateEntity(condition.id()));
        }
        self.find_container_mut(owner)
            .ok_or(SequenceError::EntityNotFound(owner))?
            .attach_condition(condition)
    }

    pub fn detach_condition(&mut self, owner: EntityId, id: EntityId) -> Result<ConditionNode> {
        self.find_container_mut(owner)
            .ok_or(SequenceError::EntityNotFound(owner))?
            .detach_condition(id)
    }

    /// Attaches a global trigger.
    pub fn attach_trigger(&mut self, mut trigger: TriggerNode) -> Result<EntityId> {
        let mut ids = Vec::new();
        trigger.walk(0, &mut |entity, _| ids.push(entity.id()));
        self.ensure_absent(ids)?;
        trigger.meta.parent = Some(self.container.id());
        let id = trigger.id();
        self.triggers.push(trigger);
        Ok(id)
    }

    /// Attaches a trigger that only watches the container `owner`. Triggers
    /// on the root container itself are always global.
    pub fn attach_local_trigger(
        &mut self,
        owner: EntityId,
        trigger: TriggerNode,
    ) -> Result<EntityId> {
        if owner == self.id() {
            return self.attach_trigger(trigger);
        }
        let mut ids = Vec::new();
        trigger.walk(0, &mut |entity, _| ids.push(entity.id()));
        self.ensure_absent(ids)?;
        self.find_container_mut(owner)
            .ok_or(SequenceError::EntityNotFound(owner))?
            .attach_trigger(trigger)
    }

    /// Detaches a global trigger, or a local one from whichever container
    /// holds it.
    pub fn detach_trigger(&mut self, id: EntityId) -> Result<TriggerNode> {
        if let Some(pos) = self.triggers.iter().position(|t| t.id() == id) {
            let mut trigger = self.triggers.remove(pos);
            trigger.meta.parent = None;
            return Ok(trigger);
        }
        let owner = self
            .find(id)
            .and_then(|entity| entity.parent())
            .ok_or(SequenceError::EntityNotFound(id))?;
        self.find_container_mut(owner)
            .ok_or(SequenceError::EntityNotFound(owner))?
            .detach_trigger(id)
    }

    pub fn set_disabled(&mut self, id: EntityId, disabled: bool) -> Result<()> {
        if self.container.contains(id) {
            return self.container.set_disabled(id, disabled);
        }
        for trigger in self.triggers.iter_mut() {
            if trigger.id() == id {
                return trigger.meta.set_disabled(disabled).map(|_| ());
            }
            if trigger.sequence.contains(id) {
                return trigger.sequence.set_disabled(id, disabled);
            }
        }
        Err(SequenceError::EntityNotFound(id))
    }

    /// Returns the whole tree, global triggers included, to CREATED.
    pub fn reset(&mut self) -> Result<()> {
        if let Some(entity) = self.first_running() {
            return Err(SequenceError::InvalidTransition {
                entity,
                from: EntityStatus::Running,
                to: EntityStatus::Created,
            });
        }
        self.container.reset()?;
        let now = Utc::now();
        for trigger in self.triggers.iter_mut() {
            trigger.rewind(now, &mut |_| {});
        }
        Ok(())
    }

    // -- execution ----------------------------------------------------------

    pub(crate) async fn execute(&mut self, ctx: &RunContext) -> EntityStatus {
        let mut issues = Vec::new();
        for trigger in &self.triggers {
            trigger.collect_issues(&mut issues);
        }
        if !issues.is_empty() {
            for issue in issues {
                warn!(%issue, "global trigger invalid");
                ctx.record_failure(issue.into());
            }
            return self.container.refuse(ctx);
        }

        let global: GlobalTriggers<'_> = tokio::sync::Mutex::new(&mut self.triggers);
        self.container.run(ctx, Scope::with_global(&global)).await
    }
}

impl From<SequenceContainer> for SequenceRootContainer {
    fn from(container: SequenceContainer) -> Self {
        Self::from_container(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::InstructionNode;
    use crate::nodes::instructions::Wait;
    use crate::nodes::triggers::AfterEntity;

    fn wait(name: &str) -> InstructionNode {
        InstructionNode::new(Wait::new(0.0)).named(name)
    }

    #[test]
    fn container_triggers_become_global() {
        let root = SequenceRootContainer::from_container(
            SequenceContainer::sequential("night").with_trigger(TriggerNode::new(
                AfterEntity::new("a"),
                SequenceContainer::sequential("after"),
            )),
        );
        assert!(root.container().triggers().is_empty());
        assert_eq!(root.triggers().len(), 1);
        assert_eq!(root.triggers()[0].parent(), Some(root.id()));
    }

    #[test]
    fn insert_into_nested_container() {
        let mut root = SequenceRootContainer::new("night");
        let inner = SequenceContainer::sequential("inner");
        let inner_id = root.add(inner).unwrap();
        let a = root.insert_into(inner_id, None, wait("a")).unwrap();
        assert_eq!(root.find(a).unwrap().parent(), Some(inner_id));
        assert!(matches!(
            root.insert_into(EntityId::new(), None, wait("b")),
            Err(SequenceError::EntityNotFound(_))
        ));
    }

    #[test]
    fn duplicate_ids_rejected_across_global_triggers() {
        let mut root = SequenceRootContainer::new("night");
        let sub = SequenceContainer::sequential("after").with(wait("c"));
        let c = sub.items()[0].clone();
        root.attach_trigger(TriggerNode::new(AfterEntity::new("a"), sub))
            .unwrap();
        let err = root.add(c).unwrap_err();
        assert!(matches!(err, SequenceError::DuplicateEntity(_)));
    }

    #[test]
    fn detach_local_and_global_triggers() {
        let mut root = SequenceRootContainer::new("night");
        let inner_id = root.add(SequenceContainer::sequential("inner")).unwrap();
        let local = root
            .attach_local_trigger(
                inner_id,
                TriggerNode::new(AfterEntity::new("x"), SequenceContainer::sequential("s")),
            )
            .unwrap();
        let global = root
            .attach_trigger(TriggerNode::new(
                AfterEntity::new("y"),
                SequenceContainer::sequential("t"),
            ))
            .unwrap();
        assert_eq!(root.detach_trigger(local).unwrap().parent(), None);
        assert_eq!(root.detach_trigger(global).unwrap().parent(), None);
        assert!(root.detach_trigger(global).is_err());
    }

    #[test]
    fn walk_includes_global_triggers() {
        let mut root = SequenceRootContainer::new("night");
        root.add(wait("a")).unwrap();
        root.attach_trigger(TriggerNode::new(
            AfterEntity::new("a"),
            SequenceContainer::sequential("after").with(wait("c")),
        ))
        .unwrap();
        // root, a, trigger, after, c
        assert_eq!(root.entity_count(), 5);
        assert!(root.validate().is_empty());
    }

    #[test]
    fn move_between_root_and_trigger_sequence() {
        let mut root = SequenceRootContainer::new("night");
        let a = root.add(wait("a")).unwrap();
        let sub = SequenceContainer::sequential("after").with(wait("c"));
        let sub_id = sub.id();
        root.attach_trigger(TriggerNode::new(AfterEntity::new("x"), sub))
            .unwrap();

        root.move_entity(a, sub_id, Some(0)).unwrap();
        assert!(root.items().is_empty());
        let names: Vec<&str> = root.triggers()[0]
            .sequence()
            .items()
            .iter()
            .map(|i| i.name())
            .collect();
        assert_eq!(names, ["a", "c"]);
        assert_eq!(root.find(a).unwrap().parent(), Some(sub_id));

        let root_id = root.id();
        root.move_entity(a, root_id, None).unwrap();
        assert_eq!(root.items().len(), 1);
        assert_eq!(root.find(a).unwrap().parent(), Some(root_id));
    }

    #[test]
    fn move_refuses_cycles_and_strangers() {
        let mut root = SequenceRootContainer::new("night");
        let outer = root.add(SequenceContainer::sequential("outer")).unwrap();
        let inner = root
            .insert_into(outer, None, SequenceContainer::sequential("inner"))
            .unwrap();
        assert!(matches!(
            root.move_entity(outer, inner, None),
            Err(SequenceError::CyclicAttachment { entity }) if entity == outer
        ));
        assert!(matches!(
            root.move_entity(outer, EntityId::new(), None),
            Err(SequenceError::EntityNotFound(_))
        ));
        assert_eq!(root.find(inner).unwrap().parent(), Some(outer));
    }
}

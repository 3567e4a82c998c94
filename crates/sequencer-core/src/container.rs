//! The sequence tree: containers, their children, and the conditions and
//! triggers attached to them.
//!
//! Ownership is strictly downward. A container owns its items, conditions
//! and triggers; a trigger owns its sub-sequence. Each entity records its
//! parent's id, never a pointer to it.

use crate::error::{Result, SequenceError};
use crate::node::{Condition, Instruction, Trigger};
use crate::progress::StatusEvent;
use crate::types::{
    ConditionMode, EntityId, EntityKind, EntityStatus, ExecutionStrategy, FailurePolicy, Target,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ---------------------------------------------------------------------------
// EntityMeta
// ---------------------------------------------------------------------------

/// Identity, display name, lifecycle status and parent link shared by every
/// node in the tree.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub(crate) id: EntityId,
    pub(crate) name: String,
    pub(crate) status: EntityStatus,
    pub(crate) parent: Option<EntityId>,
}

impl EntityMeta {
    pub fn new(name: impl Into<String>) -> Self {
        EntityMeta {
            id: EntityId::new(),
            name: name.into(),
            status: EntityStatus::Created,
            parent: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> EntityStatus {
        self.status
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    /// Moves to `to` if the lifecycle allows it and returns the previous
    /// status. The only way a status ever changes.
    pub fn transition(&mut self, to: EntityStatus) -> Result<EntityStatus> {
        if !self.status.can_transition_to(to) {
            return Err(SequenceError::InvalidTransition {
                entity: self.id,
                from: self.status,
                to,
            });
        }
        let from = self.status;
        self.status = to;
        Ok(from)
    }

    /// Returns the previous status when something changed.
    pub(crate) fn set_disabled(&mut self, disabled: bool) -> Result<Option<EntityStatus>> {
        if disabled == (self.status == EntityStatus::Disabled) {
            return Ok(None);
        }
        let to = if disabled {
            EntityStatus::Disabled
        } else {
            EntityStatus::Created
        };
        self.transition(to).map(Some)
    }

    /// Fresh identity with the initial status. Used for copies.
    fn renew(&mut self) {
        self.id = EntityId::new();
        if self.status != EntityStatus::Disabled {
            self.status = EntityStatus::Created;
        }
    }
}

/// Read access common to every node kind.
pub trait Entity {
    fn meta(&self) -> &EntityMeta;
    fn kind(&self) -> EntityKind;
    fn discriminator(&self) -> &str;

    fn id(&self) -> EntityId {
        self.meta().id
    }

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn status(&self) -> EntityStatus {
        self.meta().status
    }

    fn parent(&self) -> Option<EntityId> {
        self.meta().parent
    }
}

// ---------------------------------------------------------------------------
// Leaf nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InstructionNode {
    pub(crate) meta: EntityMeta,
    pub(crate) attempts: u32,
    pub(crate) logic: Box<dyn Instruction>,
}

impl InstructionNode {
    pub fn new(logic: impl Instruction + 'static) -> Self {
        Self::from_boxed(Box::new(logic))
    }

    pub fn from_boxed(logic: Box<dyn Instruction>) -> Self {
        InstructionNode {
            meta: EntityMeta::new(logic.discriminator()),
            attempts: 1,
            logic,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.meta.name = name.into();
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn logic(&self) -> &dyn Instruction {
        self.logic.as_ref()
    }

    pub fn logic_mut(&mut self) -> &mut dyn Instruction {
        self.logic.as_mut()
    }
}

impl Entity for InstructionNode {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Instruction
    }

    fn discriminator(&self) -> &str {
        self.logic.discriminator()
    }
}

#[derive(Debug, Clone)]
pub struct ConditionNode {
    pub(crate) meta: EntityMeta,
    pub(crate) logic: Box<dyn Condition>,
}

impl ConditionNode {
    pub fn new(logic: impl Condition + 'static) -> Self {
        Self::from_boxed(Box::new(logic))
    }

    pub fn from_boxed(logic: Box<dyn Condition>) -> Self {
        ConditionNode {
            meta: EntityMeta::new(logic.discriminator()),
            logic,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.meta.name = name.into();
        self
    }

    pub fn logic(&self) -> &dyn Condition {
        self.logic.as_ref()
    }

    pub fn logic_mut(&mut self) -> &mut dyn Condition {
        self.logic.as_mut()
    }
}

impl Entity for ConditionNode {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Condition
    }

    fn discriminator(&self) -> &str {
        self.logic.discriminator()
    }
}

/// A trigger together with the sub-sequence it runs when it fires.
#[derive(Debug, Clone)]
pub struct TriggerNode {
    pub(crate) meta: EntityMeta,
    pub(crate) logic: Box<dyn Trigger>,
    pub(crate) sequence: SequenceContainer,
}

impl TriggerNode {
    pub fn new(logic: impl Trigger + 'static, sequence: SequenceContainer) -> Self {
        Self::from_boxed(Box::new(logic), sequence)
    }

    pub fn from_boxed(logic: Box<dyn Trigger>, mut sequence: SequenceContainer) -> Self {
        let meta = EntityMeta::new(logic.discriminator());
        sequence.meta.parent = Some(meta.id);
        TriggerNode {
            meta,
            logic,
            sequence,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.meta.name = name.into();
        self
    }

    pub fn logic(&self) -> &dyn Trigger {
        self.logic.as_ref()
    }

    pub fn sequence(&self) -> &SequenceContainer {
        &self.sequence
    }

    pub fn sequence_mut(&mut self) -> &mut SequenceContainer {
        &mut self.sequence
    }

    fn renew(&mut self) {
        self.meta.renew();
        self.logic.reset();
        self.sequence.renew();
        self.sequence.meta.parent = Some(self.meta.id);
    }

    pub(crate) fn walk<'a>(&'a self, depth: usize, visit: &mut dyn FnMut(&'a dyn Entity, usize)) {
        visit(self, depth);
        self.sequence.walk_at(depth + 1, visit);
    }

    pub(crate) fn collect_issues(&self, issues: &mut Vec<ValidationIssue>) {
        if self.meta.status == EntityStatus::Disabled {
            return;
        }
        for message in self.logic.validate() {
            issues.push(ValidationIssue::of(self, message));
        }
        self.sequence.collect_issues(issues);
    }

    pub(crate) fn rewind(&mut self, now: DateTime<Utc>, sink: &mut dyn FnMut(StatusEvent)) {
        rewind_meta(
            &mut self.meta,
            EntityKind::Trigger,
            self.logic.discriminator(),
            now,
            sink,
        );
        self.logic.reset();
        self.sequence.rewind(now, sink);
    }
}

impl Entity for TriggerNode {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Trigger
    }

    fn discriminator(&self) -> &str {
        self.logic.discriminator()
    }
}

// ---------------------------------------------------------------------------
// SequenceItem
// ---------------------------------------------------------------------------

/// An ordered child of a container.
#[derive(Debug, Clone)]
pub enum SequenceItem {
    Container(Box<SequenceContainer>),
    Instruction(InstructionNode),
}

impl From<SequenceContainer> for SequenceItem {
    fn from(container: SequenceContainer) -> Self {
        SequenceItem::Container(Box::new(container))
    }
}

impl From<InstructionNode> for SequenceItem {
    fn from(instruction: InstructionNode) -> Self {
        SequenceItem::Instruction(instruction)
    }
}

impl SequenceItem {
    pub fn as_container(&self) -> Option<&SequenceContainer> {
        match self {
            SequenceItem::Container(c) => Some(c),
            SequenceItem::Instruction(_) => None,
        }
    }

    pub fn as_instruction(&self) -> Option<&InstructionNode> {
        match self {
            SequenceItem::Instruction(i) => Some(i),
            SequenceItem::Container(_) => None,
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        match self {
            SequenceItem::Container(c) => c.contains(id),
            SequenceItem::Instruction(i) => i.meta.id == id,
        }
    }

    pub(crate) fn meta_mut(&mut self) -> &mut EntityMeta {
        match self {
            SequenceItem::Container(c) => &mut c.meta,
            SequenceItem::Instruction(i) => &mut i.meta,
        }
    }

    /// Matches by display name or by id string, depth first.
    pub(crate) fn find_by_reference(&self, reference: &str) -> Option<&SequenceItem> {
        if self.name() == reference || self.id().to_string() == reference {
            return Some(self);
        }
        match self {
            SequenceItem::Container(c) => c
                .items
                .iter()
                .find_map(|item| item.find_by_reference(reference)),
            SequenceItem::Instruction(_) => None,
        }
    }

    fn renew(&mut self) {
        match self {
            SequenceItem::Container(c) => c.renew(),
            SequenceItem::Instruction(i) => i.meta.renew(),
        }
    }

    pub(crate) fn walk<'a>(&'a self, depth: usize, visit: &mut dyn FnMut(&'a dyn Entity, usize)) {
        match self {
            SequenceItem::Container(c) => c.walk_at(depth, visit),
            SequenceItem::Instruction(i) => visit(i, depth),
        }
    }
}

impl Entity for SequenceItem {
    fn meta(&self) -> &EntityMeta {
        match self {
            SequenceItem::Container(c) => &c.meta,
            SequenceItem::Instruction(i) => &i.meta,
        }
    }

    fn kind(&self) -> EntityKind {
        match self {
            SequenceItem::Container(_) => EntityKind::Container,
            SequenceItem::Instruction(_) => EntityKind::Instruction,
        }
    }

    fn discriminator(&self) -> &str {
        match self {
            SequenceItem::Container(c) => &c.discriminator,
            SequenceItem::Instruction(i) => i.logic.discriminator(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub entity: EntityId,
    pub name: String,
    pub discriminator: String,
    pub message: String,
}

impl ValidationIssue {
    pub(crate) fn of(entity: &dyn Entity, message: impl Into<String>) -> Self {
        ValidationIssue {
            entity: entity.id(),
            name: entity.name().to_string(),
            discriminator: entity.discriminator().to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.discriminator, self.message)
    }
}

impl From<ValidationIssue> for SequenceError {
    fn from(issue: ValidationIssue) -> Self {
        SequenceError::ValidationFailed {
            entity: issue.entity,
            discriminator: issue.discriminator,
            reason: issue.message,
        }
    }
}

// ---------------------------------------------------------------------------
// SequenceContainer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSettings {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub strategy: ExecutionStrategy,
    #[serde(default)]
    pub condition_mode: ConditionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

#[derive(Debug, Clone)]
pub struct SequenceContainer {
    pub(crate) meta: EntityMeta,
    pub(crate) discriminator: String,
    pub(crate) settings: ContainerSettings,
    pub(crate) items: Vec<SequenceItem>,
    pub(crate) conditions: Vec<ConditionNode>,
    pub(crate) triggers: Vec<TriggerNode>,
}

impl Entity for SequenceContainer {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Container
    }

    fn discriminator(&self) -> &str {
        &self.discriminator
    }
}

impl SequenceContainer {
    pub const SEQUENTIAL: &'static str = "container.sequential";
    pub const PARALLEL: &'static str = "container.parallel";
    pub const TARGET: &'static str = "container.target";

    pub fn new(
        discriminator: impl Into<String>,
        name: impl Into<String>,
        settings: ContainerSettings,
    ) -> Self {
        SequenceContainer {
            meta: EntityMeta::new(name),
            discriminator: discriminator.into(),
            settings,
            items: Vec::new(),
            conditions: Vec::new(),
            triggers: Vec::new(),
        }
    }

    pub fn sequential(name: impl Into<String>) -> Self {
        Self::new(Self::SEQUENTIAL, name, ContainerSettings::default())
    }

    pub fn parallel(name: impl Into<String>) -> Self {
        let settings = ContainerSettings {
            strategy: ExecutionStrategy::Parallel,
            ..ContainerSettings::default()
        };
        Self::new(Self::PARALLEL, name, settings)
    }

    pub fn target(name: impl Into<String>, target: Target) -> Self {
        let settings = ContainerSettings {
            target: Some(target),
            ..ContainerSettings::default()
        };
        Self::new(Self::TARGET, name, settings)
    }

    // -- builders -----------------------------------------------------------
    //
    // Builders trust that freshly built nodes carry fresh ids. `validate`
    // reports duplicates if that trust was misplaced.

    pub fn with(mut self, item: impl Into<SequenceItem>) -> Self {
        let mut item = item.into();
        item.meta_mut().parent = Some(self.meta.id);
        self.items.push(item);
        self
    }

    pub fn with_condition(mut self, mut condition: ConditionNode) -> Self {
        condition.meta.parent = Some(self.meta.id);
        self.conditions.push(condition);
        self
    }

    pub fn with_trigger(mut self, mut trigger: TriggerNode) -> Self {
        trigger.meta.parent = Some(self.meta.id);
        self.triggers.push(trigger);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.settings.failure_policy = policy;
        self
    }

    pub fn with_condition_mode(mut self, mode: ConditionMode) -> Self {
        self.settings.condition_mode = mode;
        self
    }

    // -- accessors ----------------------------------------------------------

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ContainerSettings {
        &mut self.settings
    }

    pub fn items(&self) -> &[SequenceItem] {
        &self.items
    }

    pub fn conditions(&self) -> &[ConditionNode] {
        &self.conditions
    }

    pub fn triggers(&self) -> &[TriggerNode] {
        &self.triggers
    }

    pub fn target_info(&self) -> Option<&Target> {
        self.settings.target.as_ref()
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.meta.name = name.into();
    }

    // -- queries ------------------------------------------------------------

    /// Visits every entity in the subtree, depth first: the container,
    /// its conditions, its triggers (each followed by its sub-sequence),
    /// then its items.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a dyn Entity, usize)) {
        self.walk_at(0, visit);
    }

    pub(crate) fn walk_at<'a>(&'a self, depth: usize, visit: &mut dyn FnMut(&'a dyn Entity, usize)) {
        visit(self, depth);
        for condition in &self.conditions {
            visit(condition, depth + 1);
        }
        for trigger in &self.triggers {
            trigger.walk(depth + 1, visit);
        }
        for item in &self.items {
            item.walk(depth + 1, visit);
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

    /// Number of entities in the subtree, this container included.
    pub fn entity_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_, _| count += 1);
        count
    }

    pub fn find_item(&self, id: EntityId) -> Option<&SequenceItem> {
        for item in &self.items {
            if item.id() == id {
                return Some(item);
            }
            if let SequenceItem::Container(c) = item {
                if let Some(found) = c.find_item(id) {
                    return Some(found);
                }
            }
        }
        self.triggers
            .iter()
            .find_map(|t| t.sequence.find_item(id))
    }

    pub fn find_container(&self, id: EntityId) -> Option<&SequenceContainer> {
        if self.meta.id == id {
            return Some(self);
        }
        for item in &self.items {
            if let SequenceItem::Container(c) = item {
                if let Some(found) = c.find_container(id) {
                    return Some(found);
                }
            }
        }
        self.triggers
            .iter()
            .find_map(|t| t.sequence.find_container(id))
    }

    pub fn find_container_mut(&mut self, id: EntityId) -> Option<&mut SequenceContainer> {
        if self.meta.id == id {
            return Some(self);
        }
        for item in self.items.iter_mut() {
            if let SequenceItem::Container(c) = item {
                if let Some(found) = c.find_container_mut(id) {
                    return Some(found);
                }
            }
        }
        for trigger in self.triggers.iter_mut() {
            if let Some(found) = trigger.sequence.find_container_mut(id) {
                return Some(found);
            }
        }
        None
    }

    pub(crate) fn meta_mut(&mut self, id: EntityId) -> Option<&mut EntityMeta> {
        if self.meta.id == id {
            return Some(&mut self.meta);
        }
        for condition in self.conditions.iter_mut() {
            if condition.meta.id == id {
                return Some(&mut condition.meta);
            }
        }
        for trigger in self.triggers.iter_mut() {
            if trigger.meta.id == id {
                return Some(&mut trigger.meta);
            }
            if let Some(found) = trigger.sequence.meta_mut(id) {
                return Some(found);
            }
        }
        for item in self.items.iter_mut() {
            match item {
                SequenceItem::Instruction(i) if i.meta.id == id => return Some(&mut i.meta),
                SequenceItem::Instruction(_) => {}
                SequenceItem::Container(c) => {
                    if let Some(found) = c.meta_mut(id) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    /// Containers in the subtree that carry sky coordinates.
    pub fn targets(&self) -> Vec<&SequenceContainer> {
        let mut found = Vec::new();
        self.collect_targets(&mut found);
        found
    }

    fn collect_targets<'a>(&'a self, found: &mut Vec<&'a SequenceContainer>) {
        if self.settings.target.is_some() {
            found.push(self);
        }
        for item in &self.items {
            if let SequenceItem::Container(c) = item {
                c.collect_targets(found);
            }
        }
    }

    pub(crate) fn first_running(&self) -> Option<EntityId> {
        let mut running = None;
        self.walk(&mut |entity, _| {
            if running.is_none() && entity.status() == EntityStatus::Running {
                running = Some(entity.id());
            }
        });
        running
    }

    // -- editing ------------------------------------------------------------

    pub fn add(&mut self, item: impl Into<SequenceItem>) -> Result<EntityId> {
        let index = self.items.len();
        self.insert(index, item)
    }

    /// Inserts `item` at `index` (clamped to the end). Fails with
    /// `DuplicateEntity` if any id in `item` already lives in this subtree.
    pub fn insert(&mut self, index: usize, item: impl Into<SequenceItem>) -> Result<EntityId> {
        let mut item = item.into();
        self.ensure_absent(&item)?;
        item.meta_mut().parent = Some(self.meta.id);
        let id = item.id();
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        Ok(id)
    }

    fn ensure_absent(&self, item: &SequenceItem) -> Result<()> {
        let mut clash = None;
        item.walk(0, &mut |entity, _| {
            if clash.is_none() && self.contains(entity.id()) {
                clash = Some(entity.id());
            }
        });
        match clash {
            Some(id) => Err(SequenceError::DuplicateEntity(id)),
            None => Ok(()),
        }
    }

    /// Detaches the item with `id` from anywhere in the subtree and clears
    /// its parent link.
    pub fn remove(&mut self, id: EntityId) -> Result<SequenceItem> {
        self.take_item(id).ok_or(SequenceError::EntityNotFound(id))
    }

    fn take_item(&mut self, id: EntityId) -> Option<SequenceItem> {
        if let Some(pos) = self.items.iter().position(|item| item.id() == id) {
            let mut item = self.items.remove(pos);
            item.meta_mut().parent = None;
            return Some(item);
        }
        for item in self.items.iter_mut() {
            if let SequenceItem::Container(c) = item {
                if let Some(found) = c.take_item(id) {
                    return Some(found);
                }
            }
        }
        for trigger in self.triggers.iter_mut() {
            if let Some(found) = trigger.sequence.take_item(id) {
                return Some(found);
            }
        }
        None
    }

    /// Re-parents the item `id` under the container `new_parent`, at
    /// `index` or at the end.
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
        if self.find_container(new_parent).is_none() {
            return Err(SequenceError::EntityNotFound(new_parent));
        }
        let item = self
            .take_item(id)
            .ok_or(SequenceError::EntityNotFound(id))?;
        let parent = self
            .find_container_mut(new_parent)
            .ok_or(SequenceError::EntityNotFound(new_parent))?;
        let index = index.unwrap_or(parent.items.len());
        parent.insert(index, item).map(|_| ())
    }

    pub fn attach_condition(&mut self, mut condition: ConditionNode) -> Result<EntityId> {
        if self.contains(condition.meta.id) {
            return Err(SequenceError::DuplicateEntity(condition.meta.id));
        }
        condition.meta.parent = Some(self.meta.id);
        let id = condition.meta.id;
        self.conditions.push(condition);
        Ok(id)
    }

    pub fn detach_condition(&mut self, id: EntityId) -> Result<ConditionNode> {
        let pos = self
            .conditions
            .iter()
            .position(|c| c.meta.id == id)
            .ok_or(SequenceError::EntityNotFound(id))?;
        let mut condition = self.conditions.remove(pos);
        condition.meta.parent = None;
        Ok(condition)
    }

    pub fn attach_trigger(&mut self, mut trigger: TriggerNode) -> Result<EntityId> {
        let mut clash = None;
        trigger.walk(0, &mut |entity, _| {
            if clash.is_none() && self.contains(entity.id()) {
                clash = Some(entity.id());
            }
        });
        if let Some(id) = clash {
            return Err(SequenceError::DuplicateEntity(id));
        }
        trigger.meta.parent = Some(self.meta.id);
        let id = trigger.meta.id;
        self.triggers.push(trigger);
        Ok(id)
    }

    pub fn detach_trigger(&mut self, id: EntityId) -> Result<TriggerNode> {
        let pos = self
            .triggers
            .iter()
            .position(|t| t.meta.id == id)
            .ok_or(SequenceError::EntityNotFound(id))?;
        let mut trigger = self.triggers.remove(pos);
        trigger.meta.parent = None;
        Ok(trigger)
    }

    /// Enables or disables any entity in the subtree.
    pub fn set_disabled(&mut self, id: EntityId, disabled: bool) -> Result<()> {
        let meta = self
            .meta_mut(id)
            .ok_or(SequenceError::EntityNotFound(id))?;
        meta.set_disabled(disabled).map(|_| ())
    }

    /// A detached deep copy with fresh ids and initial statuses.
    pub fn duplicate(&self) -> SequenceContainer {
        let mut copy = self.clone();
        copy.renew();
        copy.meta.parent = None;
        copy
    }

    fn renew(&mut self) {
        self.meta.renew();
        let id = self.meta.id;
        for condition in self.conditions.iter_mut() {
            condition.meta.renew();
            condition.meta.parent = Some(id);
        }
        for trigger in self.triggers.iter_mut() {
            trigger.renew();
            trigger.meta.parent = Some(id);
        }
        for item in self.items.iter_mut() {
            item.renew();
            item.meta_mut().parent = Some(id);
        }
    }

    /// Returns every finished, failed or skipped entity in the subtree to
    /// CREATED. Disabled entities stay disabled. Fails without touching
    /// anything if some entity is still running.
    pub fn reset(&mut self) -> Result<()> {
        self.reset_with(Utc::now(), &mut |_| {})
    }

    pub(crate) fn reset_with(
        &mut self,
        now: DateTime<Utc>,
        sink: &mut dyn FnMut(StatusEvent),
    ) -> Result<()> {
        if let Some(entity) = self.first_running() {
            return Err(SequenceError::InvalidTransition {
                entity,
                from: EntityStatus::Running,
                to: EntityStatus::Created,
            });
        }
        self.rewind(now, sink);
        Ok(())
    }

    fn rewind(&mut self, now: DateTime<Utc>, sink: &mut dyn FnMut(StatusEvent)) {
        rewind_meta(&mut self.meta, EntityKind::Container, &self.discriminator, now, sink);
        for condition in self.conditions.iter_mut() {
            rewind_meta(
                &mut condition.meta,
                EntityKind::Condition,
                condition.logic.discriminator(),
                now,
                sink,
            );
        }
        for trigger in self.triggers.iter_mut() {
            trigger.rewind(now, sink);
        }
        for item in self.items.iter_mut() {
            match item {
                SequenceItem::Container(c) => c.rewind(now, sink),
                SequenceItem::Instruction(i) => rewind_meta(
                    &mut i.meta,
                    EntityKind::Instruction,
                    i.logic.discriminator(),
                    now,
                    sink,
                ),
            }
        }
    }

    // -- validation ---------------------------------------------------------

    /// Everything that should stop this subtree from running. Disabled
    /// entities are not checked, except for id clashes.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        self.walk(&mut |entity, _| {
            if !seen.insert(entity.id()) {
                issues.push(ValidationIssue::of(entity, "duplicate entity id"));
            }
        });
        self.collect_issues(&mut issues);
        issues
    }

    pub(crate) fn collect_issues(&self, issues: &mut Vec<ValidationIssue>) {
        if self.meta.status == EntityStatus::Disabled {
            return;
        }
        if self.discriminator == Self::TARGET && self.settings.target.is_none() {
            issues.push(ValidationIssue::of(self, "target container has no target"));
        }
        if let Some(target) = &self.settings.target {
            for message in target.validate() {
                issues.push(ValidationIssue::of(self, message));
            }
        }
        for condition in &self.conditions {
            if condition.meta.status == EntityStatus::Disabled {
                continue;
            }
            for message in condition.logic.validate() {
                issues.push(ValidationIssue::of(condition, message));
            }
        }
        for trigger in &self.triggers {
            trigger.collect_issues(issues);
        }
        for item in &self.items {
            match item {
                SequenceItem::Container(c) => c.collect_issues(issues),
                SequenceItem::Instruction(i) => {
                    if i.meta.status == EntityStatus::Disabled {
                        continue;
                    }
                    if i.attempts == 0 {
                        issues.push(ValidationIssue::of(i, "attempts must be at least 1"));
                    }
                    for message in i.logic.validate() {
                        issues.push(ValidationIssue::of(i, message));
                    }
                }
            }
        }
    }
}

fn rewind_meta(
    meta: &mut EntityMeta,
    kind: EntityKind,
    discriminator: &str,
    now: DateTime<Utc>,
    sink: &mut dyn FnMut(StatusEvent),
) {
    if !meta.status.is_terminal() {
        return;
    }
    if let Ok(from) = meta.transition(EntityStatus::Created) {
        sink(StatusEvent {
            entity: meta.id,
            name: meta.name.clone(),
            discriminator: discriminator.to_string(),
            kind,
            from,
            to: EntityStatus::Created,
            timestamp: now,
        });
    }
}

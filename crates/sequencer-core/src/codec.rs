//! Tree ⇄ document conversion.
//!
//! Every node is an object carrying its `type` discriminator, its identity,
//! and its own fields inline. Containers add `children`, `conditions` and
//! `triggers`; triggers add their `sequence`. Runtime status is never
//! written; only the `disabled` flag survives a save.

use crate::container::{
    ConditionNode, Entity, EntityMeta, InstructionNode, SequenceContainer, SequenceItem,
    TriggerNode,
};
use crate::error::{Result, SequenceError};
use crate::io::{atomic_write, DocumentFormat};
use crate::registry::NodeRegistry;
use crate::root::SequenceRootContainer;
use crate::types::{EntityId, EntityKind, EntityStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

pub const DOCUMENT_VERSION: u32 = 1;

/// Keys owned by the document structure. Node fields may not use them.
const RESERVED_KEYS: &[&str] = &[
    "type",
    "id",
    "name",
    "disabled",
    "attempts",
    "children",
    "conditions",
    "triggers",
    "sequence",
];

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    pub root: NodeDocument,
}

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<NodeDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<NodeDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Box<NodeDocument>>,
}

impl NodeDocument {
    /// A bare node of type `kind` with no identity; loading assigns one.
    pub fn new(kind: impl Into<String>) -> Self {
        NodeDocument {
            kind: kind.into(),
            id: None,
            name: None,
            disabled: false,
            attempts: None,
            fields: Map::new(),
            children: Vec::new(),
            conditions: Vec::new(),
            triggers: Vec::new(),
            sequence: None,
        }
    }

    fn of(kind: &str, meta: &EntityMeta, fields: Value) -> Result<Self> {
        let mut doc = NodeDocument::new(kind);
        doc.id = Some(meta.id());
        doc.name = Some(meta.name().to_string());
        doc.disabled = meta.status() == EntityStatus::Disabled;
        doc.fields = into_object(kind, fields)?;
        if let Some(key) = RESERVED_KEYS.iter().find(|k| doc.fields.contains_key(**k)) {
            return Err(SequenceError::InvalidDocument(format!(
                "{kind}: field '{key}' clashes with a document key"
            )));
        }
        Ok(doc)
    }
}

fn into_object(kind: &str, fields: Value) -> Result<Map<String, Value>> {
    match fields {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(SequenceError::InvalidDocument(format!(
            "{kind}: fields must be an object, got {other}"
        ))),
    }
}

/// Document fields laid over the factory defaults.
fn merged(kind: &str, defaults: Value, fields: Map<String, Value>) -> Result<Value> {
    let mut base = into_object(kind, defaults)?;
    base.extend(fields);
    Ok(Value::Object(base))
}

fn bad_fields(kind: &str, e: serde_json::Error) -> SequenceError {
    SequenceError::InvalidDocument(format!("{kind}: {e}"))
}

/// Type, name and id of a document node, whichever it carries.
fn locate(doc: &NodeDocument) -> String {
    let mut node = doc.kind.clone();
    if let Some(name) = &doc.name {
        node.push_str(&format!(" '{name}'"));
    }
    if let Some(id) = doc.id {
        node.push_str(&format!(" [{id}]"));
    }
    node
}

/// Attaches the location of the innermost failing node only.
fn at<T>(node: String, result: Result<T>) -> Result<T> {
    result.map_err(|e| match e {
        SequenceError::Decode { .. } => e,
        cause => SequenceError::Decode {
            node,
            cause: Box::new(cause),
        },
    })
}

// ---------------------------------------------------------------------------
// PersistenceCodec
// ---------------------------------------------------------------------------

/// Converts trees to documents and back, resolving node types through a
/// [`NodeRegistry`]. Any failure fails the whole call; no partial tree is
/// ever returned.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceCodec<'r> {
    registry: &'r NodeRegistry,
}

impl<'r> PersistenceCodec<'r> {
    pub fn new(registry: &'r NodeRegistry) -> Self {
        PersistenceCodec { registry }
    }

    // -- encoding -----------------------------------------------------------

    /// The root container's own triggers and the global triggers are both
    /// written to the root node's `triggers`.
    pub fn encode(&self, root: &SequenceRootContainer) -> Result<SequenceDocument> {
        let mut doc = self.encode_container(root.container())?;
        for trigger in root.triggers() {
            doc.triggers.push(self.encode_trigger(trigger)?);
        }
        Ok(SequenceDocument {
            version: DOCUMENT_VERSION,
            root: doc,
        })
    }

    pub fn encode_container(&self, container: &SequenceContainer) -> Result<NodeDocument> {
        self.ensure_registered(container.discriminator())?;
        let settings = serde_json::to_value(container.settings())?;
        let mut doc = NodeDocument::of(container.discriminator(), container.meta(), settings)?;
        for item in container.items() {
            doc.children.push(self.encode_item(item)?);
        }
        for condition in container.conditions() {
            doc.conditions.push(self.encode_condition(condition)?);
        }
        for trigger in container.triggers() {
            doc.triggers.push(self.encode_trigger(trigger)?);
        }
        Ok(doc)
    }

    fn encode_item(&self, item: &SequenceItem) -> Result<NodeDocument> {
        match item {
            SequenceItem::Container(c) => self.encode_container(c),
            SequenceItem::Instruction(i) => self.encode_instruction(i),
        }
    }

    fn encode_instruction(&self, node: &InstructionNode) -> Result<NodeDocument> {
        let kind = node.discriminator();
        self.ensure_registered(kind)?;
        let mut doc = NodeDocument::of(kind, node.meta(), node.logic().fields()?)?;
        doc.attempts = Some(node.attempts());
        Ok(doc)
    }

    fn encode_condition(&self, node: &ConditionNode) -> Result<NodeDocument> {
        let kind = node.discriminator();
        self.ensure_registered(kind)?;
        NodeDocument::of(kind, node.meta(), node.logic().fields()?)
    }

    fn encode_trigger(&self, node: &TriggerNode) -> Result<NodeDocument> {
        let kind = node.discriminator();
        self.ensure_registered(kind)?;
        let mut doc = NodeDocument::of(kind, node.meta(), node.logic().fields()?)?;
        doc.sequence = Some(Box::new(self.encode_container(node.sequence())?));
        Ok(doc)
    }

    /// A tree that encodes must also load.
    fn ensure_registered(&self, discriminator: &str) -> Result<()> {
        self.registry.get(discriminator).map(|_| ())
    }

    // -- decoding -----------------------------------------------------------

    pub fn decode(&self, doc: SequenceDocument) -> Result<SequenceRootContainer> {
        if doc.version != DOCUMENT_VERSION {
            return Err(SequenceError::InvalidDocument(format!(
                "unsupported document version {}",
                doc.version
            )));
        }
        let mut seen = HashSet::new();
        let node = locate(&doc.root);
        let container = at(node, self.decode_node_container(doc.root, None, &mut seen))?;
        Ok(SequenceRootContainer::from_container(container))
    }

    /// Decodes a detached container, for templates and snippets.
    pub fn decode_container(&self, doc: NodeDocument) -> Result<SequenceContainer> {
        let node = locate(&doc);
        at(node, self.decode_node_container(doc, None, &mut HashSet::new()))
    }

    fn claim(
        doc_id: Option<EntityId>,
        meta: &mut EntityMeta,
        seen: &mut HashSet<EntityId>,
    ) -> Result<()> {
        if let Some(id) = doc_id {
            meta.id = id;
        }
        if !seen.insert(meta.id) {
            return Err(SequenceError::DuplicateEntity(meta.id));
        }
        Ok(())
    }

    fn apply_common(doc: &NodeDocument, meta: &mut EntityMeta, parent: Option<EntityId>) {
        if let Some(name) = &doc.name {
            meta.name = name.clone();
        }
        if doc.disabled {
            meta.status = EntityStatus::Disabled;
        }
        meta.parent = parent;
    }

    fn reject_structure(doc: &NodeDocument, kind: EntityKind) -> Result<()> {
        let misplaced = if kind != EntityKind::Container && !doc.children.is_empty() {
            Some("children")
        } else if kind != EntityKind::Container && !doc.conditions.is_empty() {
            Some("conditions")
        } else if kind != EntityKind::Container && !doc.triggers.is_empty() {
            Some("triggers")
        } else if kind != EntityKind::Trigger && doc.sequence.is_some() {
            Some("sequence")
        } else if kind != EntityKind::Instruction && doc.attempts.is_some() {
            Some("attempts")
        } else {
            None
        };
        match misplaced {
            Some(key) => Err(SequenceError::InvalidDocument(format!(
                "{}: '{key}' is not allowed on a {kind}",
                doc.kind
            ))),
            None => Ok(()),
        }
    }

    fn decode_node_container(
        &self,
        doc: NodeDocument,
        parent: Option<EntityId>,
        seen: &mut HashSet<EntityId>,
    ) -> Result<SequenceContainer> {
        Self::reject_structure(&doc, EntityKind::Container)?;
        let mut container = self.registry.create_container(&doc.kind)?;
        Self::claim(doc.id, &mut container.meta, seen)?;
        Self::apply_common(&doc, &mut container.meta, parent);

        let defaults = serde_json::to_value(&container.settings)?;
        let settings = merged(&doc.kind, defaults, doc.fields)?;
        container.settings =
            serde_json::from_value(settings).map_err(|e| bad_fields(&doc.kind, e))?;

        let id = container.meta.id;
        for child in doc.children {
            let node = locate(&child);
            let item = at(node, self.decode_item(child, id, seen))?;
            container.items.push(item);
        }
        for condition in doc.conditions {
            let node = locate(&condition);
            let condition = at(node, self.decode_condition(condition, id, seen))?;
            container.conditions.push(condition);
        }
        for trigger in doc.triggers {
            let node = locate(&trigger);
            let trigger = at(node, self.decode_trigger(trigger, id, seen))?;
            container.triggers.push(trigger);
        }
        Ok(container)
    }

    fn decode_item(
        &self,
        doc: NodeDocument,
        parent: EntityId,
        seen: &mut HashSet<EntityId>,
    ) -> Result<SequenceItem> {
        match self.registry.get(&doc.kind)?.kind() {
            EntityKind::Container => {
                let container = self.decode_node_container(doc, Some(parent), seen)?;
                Ok(SequenceItem::Container(Box::new(container)))
            }
            EntityKind::Instruction => {
                let node = self.decode_instruction(doc, parent, seen)?;
                Ok(SequenceItem::Instruction(node))
            }
            other => Err(SequenceError::WrongKind {
                discriminator: doc.kind,
                expected: EntityKind::Instruction,
                actual: other,
            }),
        }
    }

    fn decode_instruction(
        &self,
        doc: NodeDocument,
        parent: EntityId,
        seen: &mut HashSet<EntityId>,
    ) -> Result<InstructionNode> {
        Self::reject_structure(&doc, EntityKind::Instruction)?;
        let mut node = self.registry.create_instruction(&doc.kind)?;
        Self::claim(doc.id, &mut node.meta, seen)?;
        Self::apply_common(&doc, &mut node.meta, Some(parent));
        if let Some(attempts) = doc.attempts {
            node.attempts = attempts;
        }
        let fields = merged(&doc.kind, node.logic.fields()?, doc.fields)?;
        node.logic
            .load_fields(fields)
            .map_err(|e| bad_fields(&doc.kind, e))?;
        Ok(node)
    }

    fn decode_condition(
        &self,
        doc: NodeDocument,
        parent: EntityId,
        seen: &mut HashSet<EntityId>,
    ) -> Result<ConditionNode> {
        Self::reject_structure(&doc, EntityKind::Condition)?;
        let mut node = self.registry.create_condition(&doc.kind)?;
        Self::claim(doc.id, &mut node.meta, seen)?;
        Self::apply_common(&doc, &mut node.meta, Some(parent));
        let fields = merged(&doc.kind, node.logic.fields()?, doc.fields)?;
        node.logic
            .load_fields(fields)
            .map_err(|e| bad_fields(&doc.kind, e))?;
        Ok(node)
    }

    fn decode_trigger(
        &self,
        mut doc: NodeDocument,
        parent: EntityId,
        seen: &mut HashSet<EntityId>,
    ) -> Result<TriggerNode> {
        Self::reject_structure(&doc, EntityKind::Trigger)?;
        let mut logic = self.registry.create_trigger(&doc.kind)?;
        let fields = merged(&doc.kind, logic.fields()?, std::mem::take(&mut doc.fields))?;
        logic
            .load_fields(fields)
            .map_err(|e| bad_fields(&doc.kind, e))?;

        let sequence_doc = doc.sequence.take();
        let mut node = TriggerNode::from_boxed(logic, SequenceContainer::sequential(""));
        Self::claim(doc.id, &mut node.meta, seen)?;
        Self::apply_common(&doc, &mut node.meta, Some(parent));

        let id = node.meta.id;
        node.sequence = match sequence_doc {
            Some(sequence) => {
                let at_sequence = locate(&sequence);
                at(at_sequence, self.decode_node_container(*sequence, Some(id), seen))?
            }
            None => {
                let mut empty = self.registry.create_container(SequenceContainer::SEQUENTIAL)?;
                empty.meta.parent = Some(id);
                empty
            }
        };
        Ok(node)
    }

    // -- text and files -----------------------------------------------------

    pub fn to_yaml(&self, root: &SequenceRootContainer) -> Result<String> {
        Ok(serde_yaml::to_string(&self.encode(root)?)?)
    }

    pub fn from_yaml(&self, text: &str) -> Result<SequenceRootContainer> {
        let doc: SequenceDocument = serde_yaml::from_str(text)?;
        self.decode(doc)
    }

    pub fn to_json(&self, root: &SequenceRootContainer) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.encode(root)?)?)
    }

    pub fn from_json(&self, text: &str) -> Result<SequenceRootContainer> {
        let doc: SequenceDocument = serde_json::from_str(text)?;
        self.decode(doc)
    }

    /// Writes `root` atomically, as YAML or JSON depending on the extension.
    pub fn save(&self, root: &SequenceRootContainer, path: &Path) -> Result<()> {
        let data = match DocumentFormat::from_path(path)? {
            DocumentFormat::Yaml => self.to_yaml(root)?,
            DocumentFormat::Json => self.to_json(root)?,
        };
        atomic_write(path, data.as_bytes())?;
        debug!(path = %path.display(), entities = root.entity_count(), "sequence saved");
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<SequenceRootContainer> {
        let format = DocumentFormat::from_path(path)?;
        let data = std::fs::read_to_string(path)?;
        let root = match format {
            DocumentFormat::Yaml => self.from_yaml(&data)?,
            DocumentFormat::Json => self.from_json(&data)?,
        };
        debug!(path = %path.display(), entities = root.entity_count(), "sequence loaded");
        Ok(root)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

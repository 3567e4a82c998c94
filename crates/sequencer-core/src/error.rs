use crate::types::{EntityId, EntityKind, EntityStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: EntityId,
        from: EntityStatus,
        to: EntityStatus,
    },

    #[error("validation failed for {entity} ({discriminator}): {reason}")]
    ValidationFailed {
        entity: EntityId,
        discriminator: String,
        reason: String,
    },

    #[error("unknown node type: {0}")]
    UnknownType(String),

    #[error("node type already registered: {0}")]
    DuplicateType(String),

    #[error("node type '{discriminator}' is a {actual}, expected a {expected}")]
    WrongKind {
        discriminator: String,
        expected: EntityKind,
        actual: EntityKind,
    },

    #[error("a navigation implementation is already registered")]
    AlreadyRegistered,

    #[error("navigation not initialized: no implementation registered")]
    NotInitialized,

    #[error("sequence is already running")]
    AlreadyRunning,

    #[error("no sequence is running")]
    NotRunning,

    #[error("{entity} ({discriminator}) failed: {cause}")]
    NodeExecution {
        entity: EntityId,
        discriminator: String,
        cause: String,
    },

    #[error("cannot attach {entity} under itself or one of its descendants")]
    CyclicAttachment { entity: EntityId },

    #[error("entity already present in tree: {0}")]
    DuplicateEntity(EntityId),

    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("{node}: {cause}")]
    Decode {
        node: String,
        cause: Box<SequenceError>,
    },

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SequenceError {
    /// The entity this error is about, when there is one.
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            SequenceError::InvalidTransition { entity, .. }
            | SequenceError::ValidationFailed { entity, .. }
            | SequenceError::NodeExecution { entity, .. }
            | SequenceError::CyclicAttachment { entity } => Some(*entity),
            SequenceError::DuplicateEntity(id) | SequenceError::EntityNotFound(id) => Some(*id),
            SequenceError::Decode { cause, .. } => cause.entity(),
            _ => None,
        }
    }

    /// The error underneath any document location.
    pub fn root_cause(&self) -> &SequenceError {
        match self {
            SequenceError::Decode { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SequenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_execution_names_entity_and_cause() {
        let id = EntityId::new();
        let err = SequenceError::NodeExecution {
            entity: id,
            discriminator: "instruction.fail".into(),
            cause: "dew heater offline".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("instruction.fail"));
        assert!(msg.contains("dew heater offline"));
        assert_eq!(err.entity(), Some(id));
    }

    #[test]
    fn registry_errors_have_no_entity() {
        assert_eq!(SequenceError::UnknownType("x".into()).entity(), None);
        assert_eq!(SequenceError::AlreadyRunning.entity(), None);
    }

    #[test]
    fn decode_errors_keep_their_cause() {
        let id = EntityId::new();
        let err = SequenceError::Decode {
            node: "instruction.wait 'pause'".into(),
            cause: Box::new(SequenceError::DuplicateEntity(id)),
        };
        assert!(err.to_string().starts_with("instruction.wait 'pause': "));
        assert!(matches!(err.root_cause(), SequenceError::DuplicateEntity(dup) if *dup == id));
        assert_eq!(err.entity(), Some(id));
    }
}

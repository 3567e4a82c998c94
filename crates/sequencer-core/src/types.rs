use crate::error::SequenceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Stable identity of a node in a sequence tree. Survives persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        EntityId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First eight hex digits, enough to tell entities apart in a listing.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        EntityId(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(EntityId)
            .map_err(|_| SequenceError::InvalidDocument(format!("'{s}' is not an entity id")))
    }
}

// ---------------------------------------------------------------------------
// EntityStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Created,
    Running,
    Finished,
    Failed,
    Skipped,
    Disabled,
}

impl EntityStatus {
    pub fn all() -> &'static [EntityStatus] {
        &[
            EntityStatus::Created,
            EntityStatus::Running,
            EntityStatus::Finished,
            EntityStatus::Failed,
            EntityStatus::Skipped,
            EntityStatus::Disabled,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityStatus::Created => "created",
            EntityStatus::Running => "running",
            EntityStatus::Finished => "finished",
            EntityStatus::Failed => "failed",
            EntityStatus::Skipped => "skipped",
            EntityStatus::Disabled => "disabled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EntityStatus::Finished | EntityStatus::Failed | EntityStatus::Skipped
        )
    }

    /// Whether the lifecycle allows moving from `self` to `to`.
    ///
    /// Terminal states only leave through an explicit reset (back to
    /// `Created`) or by being disabled. A disabled entity re-enters the
    /// lifecycle at `Created`.
    pub fn can_transition_to(self, to: EntityStatus) -> bool {
        use EntityStatus::*;
        match (self, to) {
            (Created, Running | Skipped | Failed | Disabled) => true,
            (Running, Finished | Failed | Skipped) => true,
            (Finished | Failed | Skipped, Created | Disabled) => true,
            (Disabled, Created) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityStatus {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityStatus::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SequenceError::InvalidDocument(format!("unknown status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Container,
    Instruction,
    Condition,
    Trigger,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Container => "container",
            EntityKind::Instruction => "instruction",
            EntityKind::Condition => "condition",
            EntityKind::Trigger => "trigger",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Container settings
// ---------------------------------------------------------------------------

/// What a container does when one of its children fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the failed child; the container ends FAILED.
    #[default]
    Abort,
    /// Record the failure and keep going; the container ends FINISHED.
    Continue,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::Continue => "continue",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[default]
    Sequential,
    Parallel,
}

impl ExecutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a container combines the results of its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    #[default]
    All,
    Any,
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Sky coordinates a target container observes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    /// Right ascension in hours, `[0, 24)`.
    pub ra_hours: f64,
    /// Declination in degrees, `[-90, 90]`.
    pub dec_degrees: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_angle: Option<f64>,
}

impl Target {
    pub fn new(name: impl Into<String>, ra_hours: f64, dec_degrees: f64) -> Self {
        Target {
            name: name.into(),
            ra_hours,
            dec_degrees,
            position_angle: None,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push("target name is empty".to_string());
        }
        if !(0.0..24.0).contains(&self.ra_hours) {
            issues.push(format!(
                "right ascension {} is outside [0, 24) hours",
                self.ra_hours
            ));
        }
        if !(-90.0..=90.0).contains(&self.dec_degrees) {
            issues.push(format!(
                "declination {} is outside [-90, 90] degrees",
                self.dec_degrees
            ));
        }
        if let Some(pa) = self.position_angle {
            if !(0.0..360.0).contains(&pa) {
                issues.push(format!("position angle {pa} is outside [0, 360) degrees"));
            }
        }
        issues
    }
}

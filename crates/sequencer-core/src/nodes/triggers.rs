use crate::context::EvalContext;
use crate::node::Trigger;
use crate::types::EntityStatus;
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

fn finished() -> EntityStatus {
    EntityStatus::Finished
}

fn yes() -> bool {
    true
}

/// Fires once another entity (by name or id) reaches `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfterEntity {
    pub entity: String,
    #[serde(default = "finished")]
    pub status: EntityStatus,
    /// Fire at most once until reset.
    #[serde(default = "yes")]
    pub once: bool,
    #[serde(skip)]
    fired: bool,
}

impl AfterEntity {
    pub const TYPE: &'static str = "trigger.after_entity";

    pub fn new(entity: impl Into<String>) -> Self {
        AfterEntity {
            entity: entity.into(),
            status: EntityStatus::Finished,
            once: true,
            fired: false,
        }
    }

    pub fn on_status(mut self, status: EntityStatus) -> Self {
        self.status = status;
        self
    }
}

impl Default for AfterEntity {
    fn default() -> Self {
        Self::new("")
    }
}

impl Trigger for AfterEntity {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    fn validate(&self) -> Vec<String> {
        if self.entity.trim().is_empty() {
            vec!["entity is empty".to_string()]
        } else {
            Vec::new()
        }
    }

    fn should_fire(&mut self, ctx: &EvalContext<'_>) -> anyhow::Result<bool> {
        if self.once && self.fired {
            return Ok(false);
        }
        if ctx.status_of(&self.entity) == Some(self.status) {
            self.fired = true;
            return Ok(true);
        }
        Ok(false)
    }

    fn reset(&mut self) {
        self.fired = false;
    }

    crate::node_fields!(Trigger);
}

/// Fires when a numeric external-state value has moved by at least
/// `threshold` since the last firing (or since it was first seen).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDrift {
    pub key: String,
    pub threshold: f64,
    #[serde(skip)]
    reference: Option<f64>,
}

impl StateDrift {
    pub const TYPE: &'static str = "trigger.state_drift";

    pub fn new(key: impl Into<String>, threshold: f64) -> Self {
        StateDrift {
            key: key.into(),
            threshold,
            reference: None,
        }
    }
}

impl Trigger for StateDrift {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.key.trim().is_empty() {
            issues.push("key is empty".to_string());
        }
        if self.threshold.is_nan() || self.threshold <= 0.0 {
            issues.push(format!("threshold must be positive, got {}", self.threshold));
        }
        issues
    }

    fn should_fire(&mut self, ctx: &EvalContext<'_>) -> anyhow::Result<bool> {
        let current = ctx
            .number(&self.key)
            .ok_or_else(|| anyhow!("no numeric value for '{}'", self.key))?;
        match self.reference {
            None => {
                self.reference = Some(current);
                Ok(false)
            }
            Some(reference) if (current - reference).abs() >= self.threshold => {
                self.reference = Some(current);
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    fn reset(&mut self) {
        self.reference = None;
    }

    crate::node_fields!(Trigger);
}

/// Fires every `seconds` of run-clock time, checked between steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interval {
    pub seconds: f64,
    #[serde(skip)]
    last: Option<DateTime<Utc>>,
}

impl Interval {
    pub const TYPE: &'static str = "trigger.interval";

    pub fn new(seconds: f64) -> Self {
        Interval {
            seconds,
            last: None,
        }
    }
}

impl Trigger for Interval {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    fn validate(&self) -> Vec<String> {
        if self.seconds.is_finite() && self.seconds > 0.0 {
            Vec::new()
        } else {
            vec![format!("seconds must be positive, got {}", self.seconds)]
        }
    }

    fn should_fire(&mut self, ctx: &EvalContext<'_>) -> anyhow::Result<bool> {
        let now = ctx.now();
        let last = *self.last.get_or_insert(ctx.run.started_at());
        let period = Duration::milliseconds((self.seconds * 1000.0) as i64);
        if now - last >= period {
            self.last = Some(now);
            return Ok(true);
        }
        Ok(false)
    }

    fn reset(&mut self) {
        self.last = None;
    }

    crate::node_fields!(Trigger);
}

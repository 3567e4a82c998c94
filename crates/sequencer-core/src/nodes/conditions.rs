use crate::context::EvalContext;
use crate::node::Condition;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Always holds, or never does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constant {
    pub value: bool,
}

impl Constant {
    pub const TYPE: &'static str = "condition.constant";

    pub fn new(value: bool) -> Self {
        Constant { value }
    }
}

impl Default for Constant {
    fn default() -> Self {
        Constant { value: true }
    }
}

impl Condition for Constant {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    fn check(&self, _ctx: &EvalContext<'_>) -> anyhow::Result<bool> {
        Ok(self.value)
    }

    crate::node_fields!(Condition);
}

/// Holds while the run clock is before `until`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeforeTime {
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl BeforeTime {
    pub const TYPE: &'static str = "condition.before_time";

    pub fn new(until: DateTime<Utc>) -> Self {
        BeforeTime { until: Some(until) }
    }
}

impl Condition for BeforeTime {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    fn validate(&self) -> Vec<String> {
        match self.until {
            Some(_) => Vec::new(),
            None => vec!["until is not set".to_string()],
        }
    }

    fn check(&self, ctx: &EvalContext<'_>) -> anyhow::Result<bool> {
        let until = self.until.ok_or_else(|| anyhow!("until is not set"))?;
        Ok(ctx.now() < until)
    }

    crate::node_fields!(Condition);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    #[default]
    Eq,
    Ne,
}

impl CompareOp {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }
}

/// Compares a numeric external-state value against a constant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateCompare {
    pub key: String,
    #[serde(default)]
    pub op: CompareOp,
    pub value: f64,
}

impl StateCompare {
    pub const TYPE: &'static str = "condition.state_compare";

    pub fn new(key: impl Into<String>, op: CompareOp, value: f64) -> Self {
        StateCompare {
            key: key.into(),
            op,
            value,
        }
    }
}

impl Condition for StateCompare {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    fn validate(&self) -> Vec<String> {
        if self.key.trim().is_empty() {
            vec!["key is empty".to_string()]
        } else {
            Vec::new()
        }
    }

    fn check(&self, ctx: &EvalContext<'_>) -> anyhow::Result<bool> {
        let current = ctx
            .number(&self.key)
            .ok_or_else(|| anyhow!("no numeric value for '{}'", self.key))?;
        Ok(self.op.apply(current, self.value))
    }

    crate::node_fields!(Condition);
}

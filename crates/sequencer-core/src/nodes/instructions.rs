use crate::context::StepContext;
use crate::node::{Instruction, Interrupted};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

// ---------------------------------------------------------------------------
// Wait
// ---------------------------------------------------------------------------

/// Sleeps for a fixed time. Cancel and skip cut the wait short.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Wait {
    pub seconds: f64,
}

impl Wait {
    pub const TYPE: &'static str = "instruction.wait";

    pub fn new(seconds: f64) -> Self {
        Wait { seconds }
    }
}

#[async_trait]
impl Instruction for Wait {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    fn validate(&self) -> Vec<String> {
        if self.seconds.is_finite() && self.seconds >= 0.0 {
            Vec::new()
        } else {
            vec![format!(
                "seconds must be a non-negative number, got {}",
                self.seconds
            )]
        }
    }

    async fn execute(&mut self, step: &StepContext<'_>) -> anyhow::Result<()> {
        let duration = Duration::try_from_secs_f64(self.seconds)?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = step.interrupted() => Err(anyhow::Error::new(Interrupted)),
        }
    }

    crate::node_fields!(Instruction);
}

// ---------------------------------------------------------------------------
// LogMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Writes a line to the run log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogMessage {
    pub message: String,
    #[serde(default)]
    pub level: LogLevel,
}

impl LogMessage {
    pub const TYPE: &'static str = "instruction.log";

    pub fn new(message: impl Into<String>) -> Self {
        LogMessage {
            message: message.into(),
            level: LogLevel::Info,
        }
    }
}

#[async_trait]
impl Instruction for LogMessage {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    async fn execute(&mut self, step: &StepContext<'_>) -> anyhow::Result<()> {
        let msg = &self.message;
        match self.level {
            LogLevel::Trace => trace!(step = step.name, "{msg}"),
            LogLevel::Debug => debug!(step = step.name, "{msg}"),
            LogLevel::Info => info!(step = step.name, "{msg}"),
            LogLevel::Warn => warn!(step = step.name, "{msg}"),
            LogLevel::Error => error!(step = step.name, "{msg}"),
        }
        Ok(())
    }

    crate::node_fields!(Instruction);
}

// ---------------------------------------------------------------------------
// SetState
// ---------------------------------------------------------------------------

/// Writes one value into the run's external state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetState {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

impl SetState {
    pub const TYPE: &'static str = "instruction.set_state";

    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        SetState {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl Instruction for SetState {
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

    async fn execute(&mut self, step: &StepContext<'_>) -> anyhow::Result<()> {
        step.run.state().set(&self.key, self.value.clone());
        debug!(key = %self.key, value = %self.value, "state updated");
        Ok(())
    }

    crate::node_fields!(Instruction);
}

// ---------------------------------------------------------------------------
// Fail
// ---------------------------------------------------------------------------

/// Always fails with `message`. Useful for exercising failure policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fail {
    pub message: String,
}

impl Fail {
    pub const TYPE: &'static str = "instruction.fail";

    pub fn new(message: impl Into<String>) -> Self {
        Fail {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Instruction for Fail {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    async fn execute(&mut self, _step: &StepContext<'_>) -> anyhow::Result<()> {
        anyhow::bail!("{}", self.message)
    }

    crate::node_fields!(Instruction);
}

//! Drives a root container to completion and exposes pause, resume, cancel
//! and skip to callers on other tasks.

use crate::container::Entity;
use crate::context::{RunContext, RunControl};
use crate::error::{Result, SequenceError};
use crate::root::SequenceRootContainer;
use crate::types::{EntityId, EntityStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    Running,
    Paused,
}

impl ExecutorState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Running => "running",
            ExecutorState::Paused => "paused",
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished run reports. Node failures land in `failures`; they are
/// never returned as `Err` from [`Executor::run`].
#[derive(Debug)]
pub struct RunOutcome {
    pub status: EntityStatus,
    pub cancelled: bool,
    pub failures: Vec<SequenceError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == EntityStatus::Finished
    }

    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }
}

/// Runs one sequence at a time. Share it (`Arc<Executor>` or a plain
/// reference) with whoever needs to pause, cancel or skip.
#[derive(Debug, Default)]
pub struct Executor {
    control: Mutex<Option<RunControl>>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<RunControl>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Result<RunControl> {
        self.slot().clone().ok_or(SequenceError::NotRunning)
    }

    pub fn state(&self) -> ExecutorState {
        match self.slot().as_ref() {
            None => ExecutorState::Idle,
            Some(control) if control.is_paused() => ExecutorState::Paused,
            Some(_) => ExecutorState::Running,
        }
    }

    /// Runs `root` to a terminal status. `ctx` supplies the clock, external
    /// state and progress sink; control signals are fresh for every run.
    ///
    /// The root must be CREATED (a DISABLED root returns immediately). A
    /// finished root has to be reset first.
    pub async fn run(
        &self,
        root: &mut SequenceRootContainer,
        ctx: &RunContext,
    ) -> Result<RunOutcome> {
        match root.status() {
            EntityStatus::Created | EntityStatus::Disabled => {}
            EntityStatus::Running => return Err(SequenceError::AlreadyRunning),
            from => {
                return Err(SequenceError::InvalidTransition {
                    entity: root.id(),
                    from,
                    to: EntityStatus::Running,
                })
            }
        }

        let mut known = HashSet::new();
        root.walk(&mut |entity, _| {
            known.insert(entity.id());
        });
        let control = RunControl::new().watching(known);
        {
            let mut slot = self.slot();
            if slot.is_some() {
                return Err(SequenceError::AlreadyRunning);
            }
            *slot = Some(control.clone());
        }
        let _guard = RunGuard { executor: self };

        let mut run_ctx = ctx.clone();
        run_ctx.begin(control.clone());
        let started_at = run_ctx.started_at();

        if root.status() == EntityStatus::Disabled {
            info!(sequence = %root.name(), "sequence disabled, nothing to run");
            return Ok(RunOutcome {
                status: EntityStatus::Disabled,
                cancelled: false,
                failures: Vec::new(),
                started_at,
                finished_at: started_at,
            });
        }

        info!(
            sequence = %root.name(),
            entities = root.entity_count(),
            "run started"
        );
        let status = root.execute(&run_ctx).await;
        for entity in control.pending_skips() {
            warn!(%entity, "skip request never applied; entity had already started or ended");
        }
        let outcome = RunOutcome {
            status,
            cancelled: run_ctx.is_cancelled(),
            failures: run_ctx.take_failures(),
            started_at,
            finished_at: run_ctx.now(),
        };
        info!(
            sequence = %root.name(),
            %status,
            cancelled = outcome.cancelled,
            failures = outcome.failures.len(),
            "run finished"
        );
        Ok(outcome)
    }

    /// Holds the run before its next child starts.
    pub fn pause(&self) -> Result<()> {
        self.current()?.set_paused(true);
        info!("run paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.current()?.set_paused(false);
        info!("run resumed");
        Ok(())
    }

    /// Level-triggered: every later check point sees it.
    pub fn cancel(&self) -> Result<()> {
        self.current()?.cancel();
        info!("run cancelled");
        Ok(())
    }

    /// Asks for `entity` to be skipped. A child that has not started yet is
    /// marked SKIPPED when its turn comes; a running instruction that
    /// listens for interruption stops and ends SKIPPED.
    ///
    /// Fails with `EntityNotFound` when `entity` is not part of the running
    /// tree.
    pub fn skip(&self, entity: EntityId) -> Result<()> {
        let control = self.current()?;
        if !control.knows(entity) {
            return Err(SequenceError::EntityNotFound(entity));
        }
        control.request_skip(entity);
        info!(%entity, "skip requested");
        Ok(())
    }
}

/// Frees the executor when a run ends, however it ends.
struct RunGuard<'a> {
    executor: &'a Executor,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.executor.slot() = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

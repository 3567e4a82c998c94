//! Running a sequence tree to completion.
//!
//! A container runs its children one after another (or all at once for the
//! parallel strategy). Before each child its conditions gate entry; after
//! each child its triggers, then the root's global triggers, get a chance to
//! fire. Pause and cancel are honoured between children; instructions that
//! race their work against [`StepContext::interrupted`] also stop mid-flight.

use crate::container::{
    ConditionNode, Entity, EntityMeta, InstructionNode, SequenceContainer, SequenceItem,
    TriggerNode,
};
use crate::context::{EvalContext, RunContext, StepContext};
use crate::error::SequenceError;
use crate::node::Interrupted;
use crate::types::{ConditionMode, EntityKind, EntityStatus, ExecutionStrategy, FailurePolicy};
use futures::future::{join_all, BoxFuture};
use tracing::{debug, info, warn};

/// Root-level triggers, shared by every container of one run.
pub(crate) type GlobalTriggers<'a> = tokio::sync::Mutex<&'a mut Vec<TriggerNode>>;

#[derive(Clone, Copy)]
pub(crate) struct Scope<'s> {
    global: Option<&'s GlobalTriggers<'s>>,
}

impl<'s> Scope<'s> {
    /// No global triggers. Trigger sub-sequences run in this scope.
    pub(crate) fn local() -> Self {
        Scope { global: None }
    }

    pub(crate) fn with_global(global: &'s GlobalTriggers<'s>) -> Self {
        Scope {
            global: Some(global),
        }
    }
}

enum Ending {
    Completed,
    Aborted,
    Cancelled,
}

/// Moves `meta` to `to` and publishes the change. A refused transition is
/// logged and recorded as a run failure.
fn apply(
    ctx: &RunContext,
    kind: EntityKind,
    discriminator: &str,
    meta: &mut EntityMeta,
    to: EntityStatus,
) -> bool {
    match meta.transition(to) {
        Ok(from) => {
            debug!(entity = %meta.id, name = %meta.name, %from, %to, "status changed");
            ctx.publish(meta.id, &meta.name, discriminator, kind, from, to);
            true
        }
        Err(e) => {
            warn!(error = %e, "status change refused");
            ctx.record_failure(e);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

impl InstructionNode {
    fn transition(&mut self, ctx: &RunContext, to: EntityStatus) -> bool {
        apply(
            ctx,
            EntityKind::Instruction,
            self.logic.discriminator(),
            &mut self.meta,
            to,
        )
    }

    async fn run(&mut self, ctx: &RunContext) -> EntityStatus {
        if !self.transition(ctx, EntityStatus::Running) {
            return EntityStatus::Failed;
        }

        let mut attempt = 1;
        loop {
            let outcome = {
                let step = StepContext {
                    run: ctx,
                    entity: self.meta.id,
                    name: &self.meta.name,
                    attempt,
                };
                self.logic.execute(&step).await
            };

            match outcome {
                Ok(()) => {
                    self.transition(ctx, EntityStatus::Finished);
                    return EntityStatus::Finished;
                }
                Err(e) if e.downcast_ref::<Interrupted>().is_some() => {
                    ctx.take_skip(self.meta.id);
                    info!(name = %self.meta.name, "instruction interrupted");
                    self.transition(ctx, EntityStatus::Skipped);
                    return EntityStatus::Skipped;
                }
                Err(e) if attempt < self.attempts && !ctx.is_cancelled() => {
                    warn!(
                        name = %self.meta.name,
                        attempt,
                        of = self.attempts,
                        error = %format!("{e:#}"),
                        "instruction failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    let error = SequenceError::NodeExecution {
                        entity: self.meta.id,
                        discriminator: self.logic.discriminator().to_string(),
                        cause: format!("{e:#}"),
                    };
                    warn!(name = %self.meta.name, %error, "instruction failed");
                    ctx.record_failure(error);
                    self.transition(ctx, EntityStatus::Failed);
                    return EntityStatus::Failed;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions and triggers
// ---------------------------------------------------------------------------

impl ConditionNode {
    fn holds(&self, eval: &EvalContext<'_>) -> bool {
        match self.logic.check(eval) {
            Ok(holds) => holds,
            Err(e) => {
                warn!(
                    condition = %self.meta.name,
                    error = %format!("{e:#}"),
                    "condition check failed, treating as false"
                );
                false
            }
        }
    }
}

impl TriggerNode {
    fn transition(&mut self, ctx: &RunContext, to: EntityStatus) -> bool {
        apply(
            ctx,
            EntityKind::Trigger,
            self.logic.discriminator(),
            &mut self.meta,
            to,
        )
    }

    /// A disabled trigger, or one whose sub-sequence is disabled, is passed
    /// over without evaluating its predicate.
    fn should_fire(&mut self, eval: &EvalContext<'_>) -> bool {
        if matches!(
            self.meta.status,
            EntityStatus::Disabled | EntityStatus::Running
        ) {
            return false;
        }
        if self.sequence.meta.status == EntityStatus::Disabled {
            debug!(trigger = %self.meta.name, "trigger sequence disabled");
            return false;
        }
        match self.logic.should_fire(eval) {
            Ok(fire) => fire,
            Err(e) => {
                warn!(
                    trigger = %self.meta.name,
                    error = %format!("{e:#}"),
                    "trigger check failed, treating as false"
                );
                false
            }
        }
    }

    /// Runs the sub-sequence to completion. A trigger that already fired
    /// once is re-armed first.
    async fn fire(&mut self, ctx: &RunContext) -> EntityStatus {
        info!(trigger = %self.meta.name, "trigger fired");
        if self.meta.status.is_terminal() {
            self.transition(ctx, EntityStatus::Created);
            let rearmed = self
                .sequence
                .reset_with(ctx.now(), &mut |event| ctx.progress().publish(event));
            if let Err(e) = rearmed {
                warn!(trigger = %self.meta.name, error = %e, "cannot re-arm trigger");
                ctx.record_failure(e);
                return EntityStatus::Failed;
            }
        }
        if !self.transition(ctx, EntityStatus::Running) {
            return EntityStatus::Failed;
        }
        let end = match self.sequence.run(ctx, Scope::local()).await {
            EntityStatus::Failed => EntityStatus::Failed,
            EntityStatus::Skipped => EntityStatus::Skipped,
            _ => EntityStatus::Finished,
        };
        self.transition(ctx, end);
        end
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

impl SequenceItem {
    fn transition(&mut self, ctx: &RunContext, to: EntityStatus) -> bool {
        match self {
            SequenceItem::Container(c) => c.transition(ctx, to),
            SequenceItem::Instruction(i) => i.transition(ctx, to),
        }
    }

    fn run<'a, 's: 'a>(
        &'a mut self,
        ctx: &'a RunContext,
        scope: Scope<'s>,
    ) -> BoxFuture<'a, EntityStatus> {
        match self {
            SequenceItem::Container(c) => c.run(ctx, scope),
            SequenceItem::Instruction(i) => Box::pin(i.run(ctx)),
        }
    }
}

impl SequenceContainer {
    fn transition(&mut self, ctx: &RunContext, to: EntityStatus) -> bool {
        apply(
            ctx,
            EntityKind::Container,
            &self.discriminator,
            &mut self.meta,
            to,
        )
    }

    /// Marks a container that was refused before it started.
    pub(crate) fn refuse(&mut self, ctx: &RunContext) -> EntityStatus {
        self.transition(ctx, EntityStatus::Failed);
        EntityStatus::Failed
    }

    /// Runs this container to a terminal status.
    pub(crate) fn run<'a, 's: 'a>(
        &'a mut self,
        ctx: &'a RunContext,
        scope: Scope<'s>,
    ) -> BoxFuture<'a, EntityStatus> {
        Box::pin(self.execute(ctx, scope))
    }

    async fn execute(&mut self, ctx: &RunContext, scope: Scope<'_>) -> EntityStatus {
        let issues = self.validate();
        if !issues.is_empty() {
            for issue in issues {
                warn!(container = %self.meta.name, %issue, "validation failed");
                ctx.record_failure(issue.into());
            }
            self.transition(ctx, EntityStatus::Failed);
            return EntityStatus::Failed;
        }

        if !self.transition(ctx, EntityStatus::Running) {
            return EntityStatus::Failed;
        }
        info!(
            container = %self.meta.name,
            strategy = %self.settings.strategy,
            children = self.items.len(),
            "container started"
        );

        let ending = match self.settings.strategy {
            ExecutionStrategy::Sequential => self.run_sequential(ctx, scope).await,
            ExecutionStrategy::Parallel => self.run_parallel(ctx, scope).await,
        };
        let status = match ending {
            Ending::Completed => EntityStatus::Finished,
            Ending::Aborted => EntityStatus::Failed,
            Ending::Cancelled => EntityStatus::Skipped,
        };
        self.transition(ctx, status);
        info!(container = %self.meta.name, %status, "container ended");
        status
    }

    async fn run_sequential(&mut self, ctx: &RunContext, scope: Scope<'_>) -> Ending {
        let policy = self.settings.failure_policy;
        for index in 0..self.items.len() {
            ctx.pause_point().await;
            if ctx.is_cancelled() {
                self.skip_pending(index, ctx);
                return Ending::Cancelled;
            }
            if !self.admit(index, ctx) {
                continue;
            }

            let status = self.items[index].run(ctx, scope).await;
            if ctx.is_cancelled() {
                self.skip_pending(index + 1, ctx);
                return Ending::Cancelled;
            }

            let trigger_failed = self.fire_triggers(Some(index), ctx, scope).await;
            if (status == EntityStatus::Failed || trigger_failed) && policy == FailurePolicy::Abort
            {
                warn!(
                    container = %self.meta.name,
                    child = %self.items[index].name(),
                    "aborting container after failure"
                );
                return Ending::Aborted;
            }
        }
        Ending::Completed
    }

    /// All admitted children start together. Triggers are checked once,
    /// after every child has ended.
    async fn run_parallel(&mut self, ctx: &RunContext, scope: Scope<'_>) -> Ending {
        ctx.pause_point().await;
        if ctx.is_cancelled() {
            self.skip_pending(0, ctx);
            return Ending::Cancelled;
        }

        let count = self.items.len();
        let admitted: Vec<bool> = (0..count).map(|index| self.admit(index, ctx)).collect();
        let runs = self
            .items
            .iter_mut()
            .zip(&admitted)
            .filter(|(_, admitted)| **admitted)
            .map(|(item, _)| item.run(ctx, scope));
        let statuses = join_all(runs).await;

        if ctx.is_cancelled() {
            self.skip_pending(0, ctx);
            return Ending::Cancelled;
        }
        let child_failed = statuses.contains(&EntityStatus::Failed);
        let trigger_failed = self.fire_triggers(None, ctx, scope).await;
        if (child_failed || trigger_failed)
            && self.settings.failure_policy == FailurePolicy::Abort
        {
            return Ending::Aborted;
        }
        Ending::Completed
    }

    /// Decides whether child `index` starts. Disabled children are passed
    /// over untouched; skip requests and failed conditions mark the child
    /// SKIPPED.
    fn admit(&mut self, index: usize, ctx: &RunContext) -> bool {
        let (id, status) = {
            let item = &self.items[index];
            (item.id(), item.status())
        };
        if status == EntityStatus::Disabled {
            debug!(child = %self.items[index].name(), "child disabled");
            return false;
        }
        if ctx.take_skip(id) {
            info!(child = %self.items[index].name(), "child skipped on request");
            self.items[index].transition(ctx, EntityStatus::Skipped);
            return false;
        }
        if !self.conditions_hold(Some(index), ctx) {
            info!(child = %self.items[index].name(), "conditions not met, child skipped");
            self.items[index].transition(ctx, EntityStatus::Skipped);
            return false;
        }
        true
    }

    fn conditions_hold(&self, current: Option<usize>, ctx: &RunContext) -> bool {
        let mut active = self
            .conditions
            .iter()
            .filter(|c| c.meta.status != EntityStatus::Disabled)
            .peekable();
        if active.peek().is_none() {
            return true;
        }
        let eval = EvalContext {
            run: ctx,
            container: self.meta.id,
            siblings: &self.items,
            current: current.and_then(|index| self.items.get(index)),
        };
        match self.settings.condition_mode {
            ConditionMode::All => active.all(|c| c.holds(&eval)),
            ConditionMode::Any => active.any(|c| c.holds(&eval)),
        }
    }

    /// Gives local triggers, then global ones, a chance to fire. Returns
    /// true if any fired sub-sequence failed.
    async fn fire_triggers(
        &mut self,
        current: Option<usize>,
        ctx: &RunContext,
        scope: Scope<'_>,
    ) -> bool {
        if ctx.is_cancelled() {
            return false;
        }
        let container = self.meta.id;
        let items = &self.items;
        let mut failed = false;

        for trigger in self.triggers.iter_mut() {
            let fire = {
                let eval = EvalContext {
                    run: ctx,
                    container,
                    siblings: items,
                    current: current.and_then(|index| items.get(index)),
                };
                trigger.should_fire(&eval)
            };
            if fire {
                failed |= trigger.fire(ctx).await == EntityStatus::Failed;
            }
        }

        if let Some(global) = scope.global {
            let mut triggers = global.lock().await;
            for trigger in triggers.iter_mut() {
                let fire = {
                    let eval = EvalContext {
                        run: ctx,
                        container,
                        siblings: items,
                        current: current.and_then(|index| items.get(index)),
                    };
                    trigger.should_fire(&eval)
                };
                if fire {
                    failed |= trigger.fire(ctx).await == EntityStatus::Failed;
                }
            }
        }
        failed
    }

    fn skip_pending(&mut self, from: usize, ctx: &RunContext) {
        for item in self.items.iter_mut().skip(from) {
            if item.status() == EntityStatus::Created {
                item.transition(ctx, EntityStatus::Skipped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ConditionNode;
    use crate::node::{Condition, Instruction};
    use crate::nodes::conditions::Constant;
    use crate::nodes::instructions::Fail;
    use crate::nodes::triggers::AfterEntity;
    use crate::progress::StatusEvent;
    use crate::types::{ConditionMode, FailurePolicy};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Records every execution into a shared journal.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Probe {
        label: String,
        #[serde(default)]
        fail_times: u32,
        #[serde(skip)]
        journal: Arc<Mutex<Vec<String>>>,
        #[serde(skip)]
        calls: Arc<AtomicU32>,
    }

    impl Probe {
        fn new(label: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Probe {
                label: label.to_string(),
                fail_times: 0,
                journal: journal.clone(),
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn failing(mut self, times: u32) -> Self {
            self.fail_times = times;
            self
        }
    }

    #[async_trait]
    impl Instruction for Probe {
        fn discriminator(&self) -> &str {
            "test.probe"
        }

        async fn execute(&mut self, _step: &StepContext<'_>) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.journal.lock().unwrap().push(self.label.clone());
            if call <= self.fail_times {
                anyhow::bail!("{} failed on call {call}", self.label);
            }
            Ok(())
        }

        crate::node_fields!(Instruction);
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Broken;

    impl Condition for Broken {
        fn discriminator(&self) -> &str {
            "test.broken"
        }

        fn check(&self, _ctx: &EvalContext<'_>) -> anyhow::Result<bool> {
            anyhow::bail!("sensor unreachable")
        }

        crate::node_fields!(Condition);
    }

    fn probe(label: &str, journal: &Arc<Mutex<Vec<String>>>) -> InstructionNode {
        InstructionNode::new(Probe::new(label, journal)).named(label)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(container: &SequenceContainer) -> Vec<(String, EntityStatus)> {
        container
            .items()
            .iter()
            .map(|i| (i.name().to_string(), i.status()))
            .collect()
    }

    #[tokio::test]
    async fn sequential_runs_children_in_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with(probe("b", &journal));
        let ctx = RunContext::new();
        let mut rx = ctx.progress().subscribe();

        let status = root.run(&ctx, Scope::local()).await;

        assert_eq!(status, EntityStatus::Finished);
        assert_eq!(*journal.lock().unwrap(), ["a", "b"]);
        let events = drain(&mut rx);
        let trail: Vec<(String, EntityStatus)> =
            events.iter().map(|e| (e.name.clone(), e.to)).collect();
        assert_eq!(
            trail,
            [
                ("root".to_string(), EntityStatus::Running),
                ("a".to_string(), EntityStatus::Running),
                ("a".to_string(), EntityStatus::Finished),
                ("b".to_string(), EntityStatus::Running),
                ("b".to_string(), EntityStatus::Finished),
                ("root".to_string(), EntityStatus::Finished),
            ]
        );
    }

    #[tokio::test]
    async fn false_condition_skips_every_child() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with(probe("b", &journal))
            .with_condition(ConditionNode::new(Constant::new(false)));

        let status = root.run(&RunContext::new(), Scope::local()).await;

        assert_eq!(status, EntityStatus::Finished);
        assert!(journal.lock().unwrap().is_empty());
        assert!(root
            .items()
            .iter()
            .all(|i| i.status() == EntityStatus::Skipped));
    }

    #[tokio::test]
    async fn any_mode_needs_one_true_condition() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with_condition(ConditionNode::new(Constant::new(false)))
            .with_condition(ConditionNode::new(Constant::new(true)))
            .with_condition_mode(ConditionMode::Any);

        root.run(&RunContext::new(), Scope::local()).await;
        assert_eq!(*journal.lock().unwrap(), ["a"]);
    }

    #[tokio::test]
    async fn condition_error_counts_as_false() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with_condition(ConditionNode::new(Broken));

        let status = root.run(&RunContext::new(), Scope::local()).await;
        assert_eq!(status, EntityStatus::Finished);
        assert_eq!(root.items()[0].status(), EntityStatus::Skipped);
    }

    #[tokio::test]
    async fn abort_stops_at_first_failure() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with(InstructionNode::new(Fail::new("filter wheel jammed")).named("bad"))
            .with(probe("c", &journal));
        let ctx = RunContext::new();

        let status = root.run(&ctx, Scope::local()).await;

        assert_eq!(status, EntityStatus::Failed);
        assert_eq!(
            statuses(&root),
            [
                ("a".to_string(), EntityStatus::Finished),
                ("bad".to_string(), EntityStatus::Failed),
                ("c".to_string(), EntityStatus::Created),
            ]
        );
        let failures = ctx.take_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("filter wheel jammed"));
    }

    #[tokio::test]
    async fn continue_policy_runs_remaining_children() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(InstructionNode::new(Fail::new("no guide star")))
            .with(probe("c", &journal))
            .with_failure_policy(FailurePolicy::Continue);

        let status = root.run(&RunContext::new(), Scope::local()).await;

        assert_eq!(status, EntityStatus::Finished);
        assert_eq!(root.items()[0].status(), EntityStatus::Failed);
        assert_eq!(*journal.lock().unwrap(), ["c"]);
    }

    #[tokio::test]
    async fn attempts_retry_until_success() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let flaky = InstructionNode::new(Probe::new("flaky", &journal).failing(2))
            .named("flaky")
            .with_attempts(3);
        let mut root = SequenceContainer::sequential("root").with(flaky);
        let ctx = RunContext::new();

        let status = root.run(&ctx, Scope::local()).await;

        assert_eq!(status, EntityStatus::Finished);
        assert_eq!(journal.lock().unwrap().len(), 3);
        assert!(ctx.take_failures().is_empty());
    }

    #[tokio::test]
    async fn attempts_exhausted_fails() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let flaky = InstructionNode::new(Probe::new("flaky", &journal).failing(5))
            .named("flaky")
            .with_attempts(2);
        let mut root = SequenceContainer::sequential("root").with(flaky);

        let status = root.run(&RunContext::new(), Scope::local()).await;

        assert_eq!(status, EntityStatus::Failed);
        assert_eq!(journal.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_child_is_passed_over() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with(probe("b", &journal));
        let b = root.items()[1].id();
        root.set_disabled(b, true).unwrap();

        let status = root.run(&RunContext::new(), Scope::local()).await;

        assert_eq!(status, EntityStatus::Finished);
        assert_eq!(*journal.lock().unwrap(), ["a"]);
        assert_eq!(root.status_of(b), Some(EntityStatus::Disabled));
    }

    #[tokio::test]
    async fn trigger_runs_between_siblings() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let sub = SequenceContainer::sequential("refocus").with(probe("c", &journal));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with(probe("b", &journal))
            .with_trigger(TriggerNode::new(AfterEntity::new("a"), sub));

        let status = root.run(&RunContext::new(), Scope::local()).await;

        assert_eq!(status, EntityStatus::Finished);
        assert_eq!(*journal.lock().unwrap(), ["a", "c", "b"]);
        assert_eq!(root.triggers()[0].status(), EntityStatus::Finished);
    }

    #[tokio::test]
    async fn failed_trigger_sequence_aborts_owner() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let sub = SequenceContainer::sequential("recover")
            .with(InstructionNode::new(Fail::new("dome stuck")));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with(probe("b", &journal))
            .with_trigger(TriggerNode::new(AfterEntity::new("a"), sub));

        let status = root.run(&RunContext::new(), Scope::local()).await;

        assert_eq!(status, EntityStatus::Failed);
        assert_eq!(*journal.lock().unwrap(), ["a"]);
        assert_eq!(root.triggers()[0].status(), EntityStatus::Failed);
    }

    #[tokio::test]
    async fn parallel_runs_every_child() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::parallel("together")
            .with(probe("a", &journal))
            .with(probe("b", &journal))
            .with(probe("c", &journal));

        let status = root.run(&RunContext::new(), Scope::local()).await;

        assert_eq!(status, EntityStatus::Finished);
        let mut ran = journal.lock().unwrap().clone();
        ran.sort();
        assert_eq!(ran, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn invalid_container_fails_without_running() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with(probe("zero", &journal).with_attempts(0));
        let ctx = RunContext::new();

        let status = root.run(&ctx, Scope::local()).await;

        assert_eq!(status, EntityStatus::Failed);
        assert!(journal.lock().unwrap().is_empty());
        assert!(matches!(
            ctx.take_failures()[0],
            SequenceError::ValidationFailed { .. }
        ));
    }

    #[tokio::test]
    async fn cancelled_before_start_skips_everything() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with(probe("b", &journal));
        let ctx = RunContext::new();
        ctx.control().cancel();

        let status = root.run(&ctx, Scope::local()).await;

        assert_eq!(status, EntityStatus::Skipped);
        assert!(journal.lock().unwrap().is_empty());
        assert!(root
            .items()
            .iter()
            .all(|i| i.status() == EntityStatus::Skipped));
    }

    #[tokio::test]
    async fn skip_request_skips_child() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut root = SequenceContainer::sequential("root")
            .with(probe("a", &journal))
            .with(probe("b", &journal));
        let a = root.items()[0].id();
        let ctx = RunContext::new();
        ctx.control().request_skip(a);

        root.run(&ctx, Scope::local()).await;

        assert_eq!(root.status_of(a), Some(EntityStatus::Skipped));
        assert_eq!(*journal.lock().unwrap(), ["b"]);
    }
}

use async_trait::async_trait;
use sequencer_core::nodes::instructions::{SetState, Wait};
use sequencer_core::nodes::triggers::AfterEntity;
use sequencer_core::{
    Condition, ConditionNode, EngineConfig, Entity, EntityId, EntityStatus, EvalContext, Executor,
    ExecutorState, Instruction, InstructionNode, NavigationMediator, NodeRegistry,
    PersistenceCodec, ProgressSink, RunContext, SequenceContainer, SequenceError,
    SequenceRootContainer, SequenceWorkspace, StepContext, Target, TriggerNode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Journal = Arc<Mutex<Vec<String>>>;

/// Appends its label to a shared journal when executed.
#[derive(Debug, Clone, Default)]
struct Record {
    label: String,
    journal: Journal,
}

#[derive(Serialize, Deserialize)]
struct RecordFields {
    label: String,
}

impl Record {
    const TYPE: &'static str = "test.record";

    fn node(label: &str, journal: &Journal) -> InstructionNode {
        InstructionNode::new(Record {
            label: label.to_string(),
            journal: journal.clone(),
        })
        .named(label)
    }
}

#[async_trait]
impl Instruction for Record {
    fn discriminator(&self) -> &str {
        Self::TYPE
    }

    async fn execute(&mut self, _step: &StepContext<'_>) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push(self.label.clone());
        Ok(())
    }

    fn fields(&self) -> serde_json::Result<Value> {
        serde_json::to_value(RecordFields {
            label: self.label.clone(),
        })
    }

    fn load_fields(&mut self, fields: Value) -> serde_json::Result<()> {
        let fields: RecordFields = serde_json::from_value(fields)?;
        self.label = fields.label;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Instruction> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Never {}

impl Condition for Never {
    fn discriminator(&self) -> &str {
        "test.never"
    }

    fn check(&self, _ctx: &EvalContext<'_>) -> anyhow::Result<bool> {
        Ok(false)
    }

    sequencer_core::node_fields!(Condition);
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

fn registry(journal: &Journal) -> NodeRegistry {
    let mut registry = NodeRegistry::with_builtins(&EngineConfig::default()).unwrap();
    let shared = journal.clone();
    registry
        .register_instruction(Record::TYPE, move || Record {
            label: String::new(),
            journal: shared.clone(),
        })
        .unwrap();
    registry.register_condition("test.never", Never::default).unwrap();
    registry
}

fn statuses(root: &SequenceRootContainer) -> Vec<EntityStatus> {
    let mut found = Vec::new();
    root.walk(&mut |entity, _| found.push(entity.status()));
    found
}

// ---------------------------------------------------------------------------
// Conditions and triggers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn false_condition_skips_children_without_executing_them() {
    let journal = journal();
    let mut root = SequenceRootContainer::from_container(
        SequenceContainer::sequential("night")
            .with(Record::node("A", &journal))
            .with(Record::node("B", &journal))
            .with_condition(ConditionNode::new(Never {})),
    );

    let outcome = Executor::new()
        .run(&mut root, &RunContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, EntityStatus::Finished);
    assert_eq!(root.status(), EntityStatus::Finished);
    assert_eq!(root.items()[0].status(), EntityStatus::Skipped);
    assert_eq!(root.items()[1].status(), EntityStatus::Skipped);
    assert!(entries(&journal).is_empty());
}

#[tokio::test]
async fn trigger_runs_once_between_siblings() {
    let journal = journal();
    let mut root = SequenceRootContainer::new("night");
    root.add(Record::node("A", &journal)).unwrap();
    root.add(Record::node("B", &journal)).unwrap();
    let sub = SequenceContainer::sequential("after A").with(Record::node("C", &journal));
    let trigger_id = root
        .attach_trigger(TriggerNode::new(AfterEntity::new("A"), sub))
        .unwrap();

    let outcome = Executor::new()
        .run(&mut root, &RunContext::new())
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(entries(&journal), ["A", "C", "B"]);

    let trigger = &root.triggers()[0];
    assert_eq!(trigger.id(), trigger_id);
    assert_eq!(trigger.status(), EntityStatus::Finished);
    let sequence = trigger.sequence();
    assert_eq!(sequence.parent(), Some(trigger_id));
    let c = &sequence.items()[0];
    assert_eq!(c.status(), EntityStatus::Finished);
    assert_eq!(c.parent(), Some(sequence.id()));
}

/// Root `[A, B]` with a global trigger that fires after `A`.
fn after_a(journal: &Journal, sub: SequenceContainer) -> (SequenceRootContainer, EntityId) {
    let mut root = SequenceRootContainer::new("night");
    root.add(Record::node("A", journal)).unwrap();
    root.add(Record::node("B", journal)).unwrap();
    let trigger_id = root
        .attach_trigger(TriggerNode::new(AfterEntity::new("A"), sub))
        .unwrap();
    (root, trigger_id)
}

#[tokio::test]
async fn disabled_trigger_never_fires() {
    let journal = journal();
    let sub = SequenceContainer::sequential("after A").with(Record::node("C", &journal));
    let (mut root, trigger_id) = after_a(&journal, sub);
    root.set_disabled(trigger_id, true).unwrap();

    let outcome = Executor::new()
        .run(&mut root, &RunContext::new())
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert!(outcome.failures.is_empty());
    assert_eq!(entries(&journal), ["A", "B"]);
    let trigger = &root.triggers()[0];
    assert_eq!(trigger.status(), EntityStatus::Disabled);
    assert_eq!(trigger.sequence().status(), EntityStatus::Created);
}

#[tokio::test]
async fn disabled_trigger_sequence_is_passed_over() {
    let journal = journal();
    let sub = SequenceContainer::sequential("after A").with(Record::node("C", &journal));
    let sequence_id = sub.id();
    let (mut root, _) = after_a(&journal, sub);
    root.set_disabled(sequence_id, true).unwrap();

    let outcome = Executor::new()
        .run(&mut root, &RunContext::new())
        .await
        .unwrap();

    assert!(outcome.succeeded(), "{:?}", outcome.failures);
    assert!(outcome.failures.is_empty());
    assert_eq!(entries(&journal), ["A", "B"]);
    let trigger = &root.triggers()[0];
    assert_eq!(trigger.status(), EntityStatus::Created);
    assert_eq!(trigger.sequence().status(), EntityStatus::Disabled);
    assert_eq!(trigger.sequence().items()[0].status(), EntityStatus::Created);
}

#[tokio::test]
async fn disabled_container_inside_trigger_sequence_is_passed_over() {
    let journal = journal();
    let inner = SequenceContainer::sequential("inner").with(Record::node("X", &journal));
    let inner_id = inner.id();
    let sub = SequenceContainer::sequential("after A")
        .with(Record::node("C", &journal))
        .with(inner)
        .with(Record::node("D", &journal));
    let (mut root, _) = after_a(&journal, sub);
    root.set_disabled(inner_id, true).unwrap();

    let outcome = Executor::new()
        .run(&mut root, &RunContext::new())
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(entries(&journal), ["A", "C", "D", "B"]);
    let sequence = root.triggers()[0].sequence();
    assert_eq!(sequence.status(), EntityStatus::Finished);
    assert_eq!(root.status_of(inner_id), Some(EntityStatus::Disabled));
    let inner = sequence.items()[1].as_container().unwrap();
    assert_eq!(inner.items()[0].status(), EntityStatus::Created);
}

#[tokio::test]
async fn skip_reaches_into_trigger_sequences() {
    let journal = journal();
    let hold = InstructionNode::new(Wait::new(3600.0)).named("hold");
    let hold_id = hold.id();
    let d = Record::node("D", &journal);
    let d_id = d.id();
    let sub = SequenceContainer::sequential("after A")
        .with(hold)
        .with(Record::node("C", &journal))
        .with(d);
    let (mut root, _) = after_a(&journal, sub);

    let sink = ProgressSink::new(64);
    let mut rx = sink.subscribe();
    let ctx = RunContext::new().with_progress(sink);
    let executor = Executor::new();

    let (outcome, ()) = tokio::join!(executor.run(&mut root, &ctx), async {
        while let Ok(event) = rx.recv().await {
            if event.entity == hold_id && event.to == EntityStatus::Running {
                break;
            }
        }
        executor.skip(d_id).unwrap();
        executor.skip(hold_id).unwrap();
    });

    let outcome = outcome.unwrap();
    assert!(outcome.succeeded());
    assert!(!outcome.cancelled);
    assert_eq!(entries(&journal), ["A", "C", "B"]);
    assert_eq!(root.status_of(hold_id), Some(EntityStatus::Skipped));
    assert_eq!(root.status_of(d_id), Some(EntityStatus::Skipped));
    assert_eq!(root.triggers()[0].status(), EntityStatus::Finished);
}

#[tokio::test]
async fn clean_run_leaves_only_finished_or_skipped() {
    let journal = journal();
    let mut root = SequenceRootContainer::new("night");
    root.add(Record::node("A", &journal)).unwrap();
    root.add(
        SequenceContainer::parallel("both")
            .with(Record::node("P1", &journal))
            .with(Record::node("P2", &journal)),
    )
    .unwrap();
    root.add(
        SequenceContainer::sequential("gated")
            .with(Record::node("G", &journal))
            .with_condition(ConditionNode::new(Never {})),
    )
    .unwrap();

    let outcome = Executor::new()
        .run(&mut root, &RunContext::new())
        .await
        .unwrap();

    assert!(outcome.succeeded());
    for status in statuses(&root) {
        assert!(
            matches!(status, EntityStatus::Finished | EntityStatus::Skipped | EntityStatus::Created),
            "unexpected {status}"
        );
    }
    // Conditions never change status; everything else ran or was skipped.
    let mut journaled = entries(&journal);
    journaled.sort();
    assert_eq!(journaled, ["A", "P1", "P2"]);
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_mid_run_leaves_nothing_running() {
    let executor = Executor::new();
    let mut root = SequenceRootContainer::new("night");
    root.add(
        SequenceContainer::sequential("target")
            .with(InstructionNode::new(Wait::new(3600.0)).named("expose"))
            .with(InstructionNode::new(Wait::new(0.0)).named("next")),
    )
    .unwrap();
    root.add(InstructionNode::new(Wait::new(0.0)).named("park"))
        .unwrap();
    let ctx = RunContext::new();

    let (outcome, ()) = tokio::join!(executor.run(&mut root, &ctx), async {
        while executor.state() == ExecutorState::Idle {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        executor.cancel().unwrap();
    });

    let outcome = outcome.unwrap();
    assert!(outcome.cancelled);
    assert!(!statuses(&root).contains(&EntityStatus::Running));
    assert_eq!(root.items()[1].status(), EntityStatus::Skipped);
}

#[tokio::test]
async fn second_run_on_busy_executor_is_refused() {
    let executor = Executor::new();
    let mut busy = SequenceRootContainer::new("busy");
    busy.add(InstructionNode::new(Wait::new(3600.0))).unwrap();
    let mut other = SequenceRootContainer::new("other");
    let ctx = RunContext::new();

    let (first, second) = tokio::join!(executor.run(&mut busy, &ctx), async {
        while executor.state() == ExecutorState::Idle {
            tokio::task::yield_now().await;
        }
        let second = executor.run(&mut other, &ctx).await;
        executor.cancel().unwrap();
        second
    });

    assert!(matches!(second, Err(SequenceError::AlreadyRunning)));
    assert!(first.unwrap().cancelled);
}

#[tokio::test]
async fn every_transition_is_published() {
    let journal = journal();
    let mut root = SequenceRootContainer::new("night");
    root.add(Record::node("A", &journal)).unwrap();
    let sink = ProgressSink::new(64);
    let mut rx = sink.subscribe();
    let ctx = RunContext::new().with_progress(sink);

    Executor::new().run(&mut root, &ctx).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let seen: Vec<(String, EntityStatus, EntityStatus)> = events
        .iter()
        .map(|e| (e.name.clone(), e.from, e.to))
        .collect();
    assert_eq!(
        seen,
        [
            ("night".to_string(), EntityStatus::Created, EntityStatus::Running),
            ("A".to_string(), EntityStatus::Created, EntityStatus::Running),
            ("A".to_string(), EntityStatus::Running, EntityStatus::Finished),
            ("night".to_string(), EntityStatus::Running, EntityStatus::Finished),
        ]
    );
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn saved_tree_loads_and_runs() {
    let journal = journal();
    let registry = registry(&journal);
    let codec = PersistenceCodec::new(&registry);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("night.yaml");

    let mut root = SequenceRootContainer::new("night");
    root.add(Record::node("A", &journal)).unwrap();
    root.add(
        SequenceContainer::target("M31", Target::new("M31", 0.712, 41.27))
            .with(Record::node("expose", &journal))
            .with(InstructionNode::new(SetState::new("last", "M31"))),
    )
    .unwrap();
    root.attach_trigger(TriggerNode::new(
        AfterEntity::new("A"),
        SequenceContainer::sequential("after A").with(Record::node("C", &journal)),
    ))
    .unwrap();
    codec.save(&root, &path).unwrap();

    let mut loaded = codec.load(&path).unwrap();
    assert_eq!(codec.encode(&loaded).unwrap(), codec.encode(&root).unwrap());

    let outcome = Executor::new()
        .run(&mut loaded, &RunContext::new())
        .await
        .unwrap();
    assert!(outcome.succeeded());
    assert_eq!(entries(&journal), ["A", "C", "expose"]);
}

#[test]
fn unknown_type_fails_the_whole_load() {
    let registry = NodeRegistry::with_builtins(&EngineConfig::default()).unwrap();
    let codec = PersistenceCodec::new(&registry);
    let json = r#"{
        "version": 1,
        "root": {
            "type": "container.sequential",
            "name": "night",
            "children": [{ "type": "test.record", "label": "A" }]
        }
    }"#;
    let err = codec.from_json(json).unwrap_err();
    assert!(matches!(err.root_cause(), SequenceError::UnknownType(t) if t == "test.record"));
}

// ---------------------------------------------------------------------------
// Navigation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mediator_registers_once_and_delegates() {
    let mediator = NavigationMediator::new();
    assert!(matches!(
        mediator.all_targets_in_advanced_sequence().await,
        Err(SequenceError::NotInitialized)
    ));

    let workspace = Arc::new(SequenceWorkspace::default());
    mediator.register(workspace.clone()).unwrap();
    assert!(matches!(
        mediator.register(Arc::new(SequenceWorkspace::default())),
        Err(SequenceError::AlreadyRegistered)
    ));

    mediator
        .add_advanced_target(Target::new("M42", 5.588, -5.39))
        .await
        .unwrap();
    let targets = mediator.all_targets_in_advanced_sequence().await.unwrap();
    assert_eq!(targets.len(), 1);

    let advanced = workspace.advanced();
    let mut root = advanced.write().await;
    let outcome = Executor::new()
        .run(&mut root, &RunContext::new())
        .await
        .unwrap();
    assert!(outcome.succeeded());
}

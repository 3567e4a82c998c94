//! Ambient services a run sees: time, external state, progress reporting,
//! and the control signals (pause, cancel, skip) the executor drives.

use crate::container::{Entity, SequenceItem};
use crate::error::SequenceError;
use crate::progress::{ProgressSink, StatusEvent};
use crate::types::{EntityId, EntityKind, EntityStatus};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// ---------------------------------------------------------------------------
// External state
// ---------------------------------------------------------------------------

/// Key/value view of the world outside the tree (equipment readings,
/// observatory flags). Conditions and triggers read it; instructions may
/// write it.
pub trait ExternalState: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn snapshot(&self) -> BTreeMap<String, Value>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryState {
    values: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(&key.into(), value.into());
        self
    }
}

impl ExternalState for MemoryState {
    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
    }

    fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ---------------------------------------------------------------------------
// RunControl
// ---------------------------------------------------------------------------

/// Signals shared between an executor and the run it started.
#[derive(Debug, Clone)]
pub(crate) struct RunControl {
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
    skips: Arc<Mutex<HashSet<EntityId>>>,
    skip_notify: Arc<Notify>,
    failures: Arc<Mutex<Vec<SequenceError>>>,
    /// Entities of the tree being run; empty outside an executor.
    known: Arc<HashSet<EntityId>>,
}

impl RunControl {
    pub(crate) fn new() -> Self {
        let (pause, _) = watch::channel(false);
        RunControl {
            cancel: CancellationToken::new(),
            pause: Arc::new(pause),
            skips: Arc::new(Mutex::new(HashSet::new())),
            skip_notify: Arc::new(Notify::new()),
            failures: Arc::new(Mutex::new(Vec::new())),
            known: Arc::new(HashSet::new()),
        }
    }

    pub(crate) fn watching(mut self, known: HashSet<EntityId>) -> Self {
        self.known = Arc::new(known);
        self
    }

    pub(crate) fn knows(&self, id: EntityId) -> bool {
        self.known.contains(&id)
    }

    /// Skip requests nothing consumed.
    pub(crate) fn pending_skips(&self) -> Vec<EntityId> {
        lock(&self.skips).iter().copied().collect()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.pause.send_replace(paused);
    }

    pub(crate) fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    pub(crate) fn request_skip(&self, id: EntityId) {
        lock(&self.skips).insert(id);
        self.skip_notify.notify_waiters();
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Everything a run needs besides the tree itself. Cheap to clone; clones
/// share services and control signals.
#[derive(Clone)]
pub struct RunContext {
    clock: Arc<dyn Clock>,
    state: Arc<dyn ExternalState>,
    progress: ProgressSink,
    control: RunControl,
    started_at: DateTime<Utc>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("started_at", &self.started_at)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        RunContext {
            clock: Arc::new(SystemClock),
            state: Arc::new(MemoryState::new()),
            progress: ProgressSink::default(),
            control: RunControl::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.started_at = clock.now();
        self.clock = clock;
        self
    }

    pub fn with_state(mut self, state: Arc<dyn ExternalState>) -> Self {
        self.state = state;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.now() - self.started_at
    }

    pub fn state(&self) -> &dyn ExternalState {
        self.state.as_ref()
    }

    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.cancel.is_cancelled()
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        self.control.cancel.cancelled().await
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_skip_requested(&self, id: EntityId) -> bool {
        lock(&self.control.skips).contains(&id)
    }

    /// Waits while the run is paused. Returns early on cancellation.
    pub(crate) async fn pause_point(&self) {
        let mut rx = self.control.pause.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = self.control.cancel.cancelled() => return,
            }
        }
    }

    /// Consumes a pending skip request for `id`.
    pub(crate) fn take_skip(&self, id: EntityId) -> bool {
        lock(&self.control.skips).remove(&id)
    }

    pub(crate) fn record_failure(&self, error: SequenceError) {
        lock(&self.control.failures).push(error);
    }

    pub(crate) fn take_failures(&self) -> Vec<SequenceError> {
        std::mem::take(&mut *lock(&self.control.failures))
    }

    /// Installs fresh control signals for a new run.
    pub(crate) fn begin(&mut self, control: RunControl) {
        self.control = control;
        self.started_at = self.clock.now();
    }

    pub(crate) fn publish(
        &self,
        entity: EntityId,
        name: &str,
        discriminator: &str,
        kind: EntityKind,
        from: EntityStatus,
        to: EntityStatus,
    ) {
        self.progress.publish(StatusEvent {
            entity,
            name: name.to_string(),
            discriminator: discriminator.to_string(),
            kind,
            from,
            to,
            timestamp: self.now(),
        });
    }

    #[cfg(test)]
    pub(crate) fn control(&self) -> &RunControl {
        &self.control
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// What an instruction sees while it executes.
pub struct StepContext<'a> {
    pub run: &'a RunContext,
    pub entity: EntityId,
    pub name: &'a str,
    /// 1-based attempt counter.
    pub attempt: u32,
}

impl StepContext<'_> {
    /// True once the run is cancelled or this entity was asked to skip.
    pub fn is_interrupted(&self) -> bool {
        self.run.is_cancelled() || self.run.is_skip_requested(self.entity)
    }

    /// Resolves once [`StepContext::is_interrupted`] becomes true. Long
    /// running instructions race their work against this.
    pub async fn interrupted(&self) {
        let control = &self.run.control;
        loop {
            let notified = control.skip_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_interrupted() {
                return;
            }
            tokio::select! {
                _ = control.cancel.cancelled() => return,
                _ = &mut notified => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EvalContext
// ---------------------------------------------------------------------------

/// Read-only view handed to conditions and triggers.
///
/// `siblings` are the children of the container being evaluated and
/// `current` is the child about to start (conditions) or the one that just
/// finished (triggers). `current` is `None` for parallel containers.
pub struct EvalContext<'a> {
    pub run: &'a RunContext,
    pub container: EntityId,
    pub siblings: &'a [SequenceItem],
    pub current: Option<&'a SequenceItem>,
}

impl<'a> EvalContext<'a> {
    pub fn now(&self) -> DateTime<Utc> {
        self.run.now()
    }

    pub fn state_value(&self, key: &str) -> Option<Value> {
        self.run.state().get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.state_value(key).and_then(|v| v.as_f64())
    }

    /// Finds an entity among the siblings (and their descendants) by name
    /// or by id.
    pub fn find(&self, reference: &str) -> Option<&'a SequenceItem> {
        self.siblings
            .iter()
            .find_map(|item| item.find_by_reference(reference))
    }

    pub fn status_of(&self, reference: &str) -> Option<EntityStatus> {
        self.find(reference).map(|item| item.status())
    }
}

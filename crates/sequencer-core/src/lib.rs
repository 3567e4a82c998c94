pub mod codec;
pub mod config;
pub mod container;
pub mod context;
mod engine;
pub mod error;
pub mod executor;
pub mod io;
pub mod mediator;
pub mod node;
pub mod nodes;
pub mod progress;
pub mod registry;
pub mod root;
pub mod types;

pub use codec::{NodeDocument, PersistenceCodec, SequenceDocument};
pub use config::EngineConfig;
pub use container::{
    ConditionNode, ContainerSettings, Entity, InstructionNode, SequenceContainer, SequenceItem,
    TriggerNode, ValidationIssue,
};
pub use context::{
    Clock, EvalContext, ExternalState, ManualClock, MemoryState, RunContext, StepContext,
    SystemClock,
};
pub use error::{Result, SequenceError};
pub use executor::{Executor, ExecutorState, RunOutcome};
pub use mediator::{NavigationMediator, SequenceNavigation, SequenceWorkspace};
pub use node::{Condition, Instruction, Interrupted, Trigger};
pub use progress::{ProgressSink, StatusEvent};
pub use registry::NodeRegistry;
pub use root::SequenceRootContainer;
pub use types::{EntityId, EntityKind, EntityStatus, Target};

#[doc(hidden)]
pub use serde_json as __serde_json;

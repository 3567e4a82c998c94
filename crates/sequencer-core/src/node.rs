//! Behaviour traits for the leaf kinds of a sequence tree.
//!
//! A node type is identified by its discriminator string (for example
//! `instruction.wait`). Its configuration round-trips through
//! [`serde_json::Value`] so that the codec can persist any node without
//! knowing its concrete type.

use crate::context::{EvalContext, StepContext};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// Returned (wrapped in `anyhow::Error`) by an instruction that stopped
/// because the run was cancelled or the entity was asked to skip. The
/// entity then ends SKIPPED instead of FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted before completion")]
pub struct Interrupted;

#[async_trait]
pub trait Instruction: Send + Sync + fmt::Debug {
    fn discriminator(&self) -> &str;

    /// Configuration problems that would make execution pointless.
    fn validate(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&mut self, step: &StepContext<'_>) -> anyhow::Result<()>;

    fn fields(&self) -> serde_json::Result<Value>;
    fn load_fields(&mut self, fields: Value) -> serde_json::Result<()>;
    fn clone_box(&self) -> Box<dyn Instruction>;
}

pub trait Condition: Send + Sync + fmt::Debug {
    fn discriminator(&self) -> &str;

    fn validate(&self) -> Vec<String> {
        Vec::new()
    }

    /// Errors count as `false`.
    fn check(&self, ctx: &EvalContext<'_>) -> anyhow::Result<bool>;

    fn fields(&self) -> serde_json::Result<Value>;
    fn load_fields(&mut self, fields: Value) -> serde_json::Result<()>;
    fn clone_box(&self) -> Box<dyn Condition>;
}

pub trait Trigger: Send + Sync + fmt::Debug {
    fn discriminator(&self) -> &str;

    fn validate(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called after every step of the owning container. Errors count as
    /// `false`.
    fn should_fire(&mut self, ctx: &EvalContext<'_>) -> anyhow::Result<bool>;

    /// Clears any latched runtime state.
    fn reset(&mut self) {}

    fn fields(&self) -> serde_json::Result<Value>;
    fn load_fields(&mut self, fields: Value) -> serde_json::Result<()>;
    fn clone_box(&self) -> Box<dyn Trigger>;
}

impl Clone for Box<dyn Instruction> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl Clone for Box<dyn Condition> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl Clone for Box<dyn Trigger> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Implements `fields`, `load_fields` and `clone_box` for a node type that
/// is `Clone + Serialize + Deserialize`.
///
/// ```ignore
/// impl Condition for Constant {
///     fn discriminator(&self) -> &str { Self::TYPE }
///     fn check(&self, _: &EvalContext<'_>) -> anyhow::Result<bool> { Ok(self.value) }
///     node_fields!(Condition);
/// }
/// ```
#[macro_export]
macro_rules! node_fields {
    ($kind:ident) => {
        fn fields(&self) -> $crate::__serde_json::Result<$crate::__serde_json::Value> {
            $crate::__serde_json::to_value(self)
        }

        fn load_fields(
            &mut self,
            fields: $crate::__serde_json::Value,
        ) -> $crate::__serde_json::Result<()> {
            *self = $crate::__serde_json::from_value(fields)?;
            Ok(())
        }

        fn clone_box(&self) -> ::std::boxed::Box<dyn $crate::node::$kind> {
            ::std::boxed::Box::new(::std::clone::Clone::clone(self))
        }
    };
}

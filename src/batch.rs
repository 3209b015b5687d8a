//! Batch entity creation on the execution target.
//!
//! A batch is an ordered list of [`CommandSpec`](crate::models::CommandSpec)s
//! that creates many related entities in one round trip. Later commands can
//! name earlier ones through batch-local refs before their real IDs exist.
//!
//! Execution is two-phase:
//!
//! 1. [`BatchPlan::build`] resolves every `parentRef` against the refs declared
//!    earlier in the batch and picks fast-path or full-command creation.
//! 2. [`BatchExecutor::run`] creates entities strictly in order, then attaches
//!    internal children, applies deferred layouts in reverse, attaches roots,
//!    resolves external parents with bounded retry, and commits once.

mod attach;
mod executor;
mod plan;
mod runtime;

pub use attach::{attach_with_retry, AttachOutcome, RetryPolicy};
pub use executor::{BatchError, BatchExecutor};
pub use plan::{
    AttachmentClass, BatchPlan, Creation, LayoutConfig, LayoutMode, ParentLink, PlanError,
    PlannedEntity,
};
pub use runtime::{DocumentRuntime, PrimitiveKind, RuntimeError};

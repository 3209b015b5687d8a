//! Execution-target side of the bridge.
//!
//! - [`MemoryDocument`] is an in-memory sandbox document implementing
//!   [`DocumentRuntime`](crate::batch::DocumentRuntime).
//! - [`TargetAgent`] answers host requests: batches go through the batch
//!   executor, everything else through the runtime's single-command path.

mod agent;
mod memory;

pub use agent::TargetAgent;
pub use memory::{LayoutEvent, MemoryDocument, MemoryNode, NodeSnapshot};

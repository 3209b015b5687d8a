//! Host-side request/response bridge to the execution target.
//!
//! The execution target can only be reached by message. This module turns
//! that one-way channel into awaitable calls:
//!
//! ```text
//! caller ──submit()──► Dispatcher ──{id,command,args}──► ConnectionManager ──► target
//!                          │                                                    │
//!                          ▼                                                    │
//!                  CorrelationTable ◄──────────── {id,result|error} ◄───────────┘
//! ```
//!
//! - [`ConnectionManager`] tracks the single attached target and its send queue.
//! - [`CorrelationTable`] holds one entry per in-flight request, settled exactly once.
//! - [`Dispatcher`] assigns IDs, picks a timeout budget and settles callers.
//! - [`TimeoutPolicy`] classifies commands as light or heavy.

mod connection;
mod correlation;
mod dispatcher;
mod error;
mod timeout;

pub use connection::{AttachToken, ConnectionManager};
pub use correlation::{CorrelationTable, PendingRequest, Settlement};
pub use dispatcher::Dispatcher;
pub use error::BridgeError;
pub use timeout::{TimeoutClass, TimeoutPolicy, HEAVY_COMMANDS, HEAVY_TIMEOUT, LIGHT_TIMEOUT};

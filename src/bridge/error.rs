//! Caller-visible failure taxonomy for bridged requests.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single `submit` call.
///
/// Every `submit` settles with either a value or exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// No execution target is attached. Raised immediately, never retried.
    #[error("No execution target is connected")]
    NotConnected,

    /// No reply arrived within the selected budget.
    #[error("Command '{command}' timed out after {}ms", .budget.as_millis())]
    Timeout { command: String, budget: Duration },

    /// The execution target ran the command and reported a failure.
    #[error("{0}")]
    Remote(String),

    /// The reply could not be interpreted.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BridgeError {
    /// Stable machine-readable code used by the HTTP adapter and clients.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::NotConnected => "not_connected",
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::Remote(_) => "remote_error",
            BridgeError::Protocol(_) => "protocol_error",
        }
    }
}

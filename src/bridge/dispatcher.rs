//! The `submit` primitive: one awaitable call per outbound request.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::bridge::{BridgeError, ConnectionManager, CorrelationTable, TimeoutPolicy};
use crate::models::{
    BatchOutcome, CommandSpec, InboundReply, OutboundRequest, StatusReport, BATCH_COMMAND,
};

/// Routes requests to the execution target and replies back to callers.
///
/// Any number of `submit` calls may be in flight at once over the one
/// channel; they complete in whatever order the target answers.
pub struct Dispatcher {
    connection: Arc<ConnectionManager>,
    table: Arc<CorrelationTable>,
    policy: TimeoutPolicy,
}

impl Dispatcher {
    pub fn new(connection: Arc<ConnectionManager>, policy: TimeoutPolicy) -> Self {
        Self {
            connection,
            table: Arc::new(CorrelationTable::new()),
            policy,
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Number of requests still waiting for a reply or a timeout.
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            attached: self.connection.is_attached(),
            attached_at: self.connection.attached_at(),
            in_flight: self.in_flight(),
        }
    }

    /// Send `command` to the execution target and wait for its reply.
    ///
    /// # Errors
    ///
    /// - `NotConnected` immediately if no target is attached
    /// - `Timeout` if no reply arrives within the budget
    /// - `Remote` with the target's error text if the command failed there
    pub async fn submit(
        &self,
        command: &str,
        args: Value,
        timeout_override: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        if !self.connection.is_attached() {
            return Err(BridgeError::NotConnected);
        }

        let id = Uuid::new_v4().to_string();
        let budget = self.policy.budget_for(command, timeout_override);

        // Register before sending so a fast reply always finds its entry.
        let pending = self.table.register(id.clone(), command, budget);
        tracing::debug!(id = %id, command, budget_ms = budget.as_millis() as u64, "Submitting");

        // On failure `pending` is dropped here, which removes the entry.
        self.connection.send(OutboundRequest::new(id, command, args))?;

        pending.wait().await
    }

    /// Run a whole batch on the execution target in one round trip.
    pub async fn execute_batch(
        &self,
        commands: Vec<CommandSpec>,
        timeout_override: Option<Duration>,
    ) -> Result<BatchOutcome, BridgeError> {
        let result = self
            .submit(BATCH_COMMAND, json!({ "commands": commands }), timeout_override)
            .await?;
        serde_json::from_value(result)
            .map_err(|e| BridgeError::Protocol(format!("Invalid batch result: {}", e)))
    }

    /// Deliver a reply from the execution target.
    ///
    /// Returns `false` if no caller was waiting for this ID (late reply after a
    /// timeout, or a duplicate); such replies are dropped.
    pub fn handle_reply(&self, reply: InboundReply) -> bool {
        let id = reply.id.clone();
        let outcome = reply.into_result().map_err(BridgeError::Remote);
        let settled = self.table.settle(&id, outcome);
        if !settled {
            tracing::debug!(id = %id, "Dropping reply with no waiting request");
        }
        settled
    }
}

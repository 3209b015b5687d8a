//! In-flight request registry keyed by correlation ID.
//!
//! # Lifecycle
//!
//! ```text
//!   register() ──► entry in table ──► reply arrives ──► settle()  ──► caller gets result
//!                        │
//!                        └──────────► deadline passes ─► expire   ──► caller gets Timeout
//! ```
//!
//! Whichever side removes the entry from the table first settles it; the
//! other finds nothing and does nothing. Settlement happens while the table
//! lock is held, so a caller whose deadline fires can always tell whether a
//! reply beat it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::bridge::BridgeError;

/// Outcome delivered to exactly one waiting caller.
pub type Settlement = Result<Value, BridgeError>;

struct PendingEntry {
    ticket: u64,
    command: String,
    registered_at: Instant,
    settle: oneshot::Sender<Settlement>,
}

/// Registry of in-flight requests.
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingEntry>>,
    next_ticket: AtomicU64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new in-flight request and return the caller's handle.
    ///
    /// The deadline starts now. If `id` is already registered the older
    /// entry is dropped, which settles its caller with a protocol error.
    pub fn register(
        self: &Arc<Self>,
        id: impl Into<String>,
        command: &str,
        budget: Duration,
    ) -> PendingRequest {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        let previous = self.lock().insert(
            id.clone(),
            PendingEntry {
                ticket,
                command: command.to_string(),
                registered_at: now,
                settle: tx,
            },
        );
        if previous.is_some() {
            tracing::warn!(id = %id, "Correlation ID reused while still in flight");
        }

        PendingRequest {
            id,
            ticket,
            command: command.to_string(),
            budget,
            deadline: now + budget,
            receiver: rx,
            table: Arc::clone(self),
            finished: false,
        }
    }

    /// Settle the entry for `id` with `outcome`.
    ///
    /// Returns `false` when no entry exists (already timed out, already
    /// settled, or never registered); the outcome is discarded.
    pub fn settle(&self, id: &str, outcome: Settlement) -> bool {
        let mut pending = self.lock();
        match pending.remove(id) {
            Some(entry) => {
                tracing::debug!(
                    id = %id,
                    command = %entry.command,
                    elapsed_ms = entry.registered_at.elapsed().as_millis() as u64,
                    "Settled in-flight request"
                );
                // The receiver may be gone if the caller was dropped; nothing to do then.
                let _ = entry.settle.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `id` only if it is still the one `ticket` registered.
    fn remove(&self, id: &str, ticket: u64) -> bool {
        let mut pending = self.lock();
        match pending.get(id) {
            Some(entry) if entry.ticket == ticket => {
                pending.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Caller-side handle for one in-flight request.
///
/// Awaiting [`PendingRequest::wait`] yields the settlement or a `Timeout` at
/// the deadline. Dropping the handle early removes the entry so a later reply
/// is ignored.
pub struct PendingRequest {
    id: String,
    ticket: u64,
    command: String,
    budget: Duration,
    deadline: Instant,
    receiver: oneshot::Receiver<Settlement>,
    table: Arc<CorrelationTable>,
    finished: bool,
}

impl PendingRequest {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the reply or the deadline, whichever comes first.
    pub async fn wait(mut self) -> Settlement {
        let outcome = match tokio::time::timeout_at(self.deadline, &mut self.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::Protocol(
                "correlation entry dropped without settlement".to_string(),
            )),
            Err(_) => self.expire(),
        };
        self.finished = true;
        outcome
    }

    fn expire(&mut self) -> Settlement {
        if self.table.remove(&self.id, self.ticket) {
            tracing::warn!(
                id = %self.id,
                command = %self.command,
                budget_ms = self.budget.as_millis() as u64,
                "Request timed out"
            );
            return Err(BridgeError::Timeout {
                command: self.command.clone(),
                budget: self.budget,
            });
        }

        // A reply removed the entry first; it was sent under the table lock,
        // so it is already waiting in the receiver.
        self.receiver.try_recv().unwrap_or_else(|_| {
            Err(BridgeError::Timeout {
                command: self.command.clone(),
                budget: self.budget,
            })
        })
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.finished && self.table.remove(&self.id, self.ticket) {
            tracing::debug!(id = %self.id, "Abandoned in-flight request");
        }
    }
}

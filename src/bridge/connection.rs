//! Tracks the single attached execution target.
//!
//! State machine: `Detached → Attached → Detached …`. Attaching while already
//! attached silently replaces the previous send queue (last writer wins).
//! Detaching never touches in-flight requests; they run out their own timeouts.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;

use crate::bridge::BridgeError;
use crate::models::OutboundRequest;

/// Proof of a particular attachment, used to detach only that attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachToken(u64);

struct Attachment {
    token: AttachToken,
    sender: UnboundedSender<OutboundRequest>,
    attached_at: DateTime<Utc>,
}

#[derive(Default)]
struct ConnectionState {
    current: Option<Attachment>,
    next_token: u64,
}

/// Owner of the one outbound channel to the execution target.
///
/// All state sits behind a single mutex so attach, detach and send observe a
/// consistent view.
#[derive(Default)]
pub struct ConnectionManager {
    state: Mutex<ConnectionState>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `sender` as the outbound channel, replacing any previous one.
    pub fn attach(&self, sender: UnboundedSender<OutboundRequest>) -> AttachToken {
        let mut state = self.lock();
        state.next_token += 1;
        let token = AttachToken(state.next_token);
        if state.current.is_some() {
            tracing::info!("Execution target replaced by a new connection");
        } else {
            tracing::info!("Execution target attached");
        }
        state.current = Some(Attachment {
            token,
            sender,
            attached_at: Utc::now(),
        });
        token
    }

    /// Detach the attachment identified by `token`.
    ///
    /// Returns `false` if that attachment was already replaced or detached,
    /// in which case the current attachment (if any) is left alone.
    pub fn detach(&self, token: AttachToken) -> bool {
        let mut state = self.lock();
        match &state.current {
            Some(current) if current.token == token => {
                state.current = None;
                tracing::info!("Execution target detached");
                true
            }
            _ => false,
        }
    }

    /// Whether a target is currently attached.
    pub fn is_attached(&self) -> bool {
        self.lock().current.is_some()
    }

    /// When the current attachment was made, or `None` if detached.
    ///
    /// Changes on every attach, so it also tells a reconnect apart from the
    /// previous connection.
    pub fn attached_at(&self) -> Option<DateTime<Utc>> {
        self.lock().current.as_ref().map(|a| a.attached_at)
    }

    /// Queue `request` on the current attachment.
    ///
    /// A closed queue means the connection is gone even if the transport has
    /// not detached yet, so it is reported as `NotConnected` too.
    pub fn send(&self, request: OutboundRequest) -> Result<(), BridgeError> {
        let state = self.lock();
        let attachment = state.current.as_ref().ok_or(BridgeError::NotConnected)?;
        attachment
            .sender
            .send(request)
            .map_err(|_| BridgeError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn request(id: &str) -> OutboundRequest {
        OutboundRequest::new(id, "get-node", Value::Null)
    }

    #[test]
    fn test_send_without_target_is_not_connected() {
        let manager = ConnectionManager::new();
        assert!(!manager.is_attached());
        assert_eq!(manager.send(request("1")), Err(BridgeError::NotConnected));
    }

    #[test]
    fn test_attach_then_send_delivers() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);

        manager.send(request("1")).unwrap();
        assert_eq!(rx.try_recv().unwrap().id, "1");
        assert!(manager.attached_at().is_some());
    }

    #[test]
    fn test_last_writer_wins() {
        let manager = ConnectionManager::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        let old = manager.attach(old_tx);
        let new = manager.attach(new_tx);
        assert_ne!(old, new);

        manager.send(request("1")).unwrap();
        assert!(old_rx.try_recv().is_err());
        assert_eq!(new_rx.try_recv().unwrap().id, "1");

        // The replaced connection closing must not detach its successor.
        assert!(!manager.detach(old));
        assert!(manager.is_attached());

        assert!(manager.detach(new));
        assert!(!manager.is_attached());
        assert!(!manager.detach(new));
    }

    #[test]
    fn test_closed_queue_is_not_connected() {
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.attach(tx);
        drop(rx);

        assert_eq!(manager.send(request("1")), Err(BridgeError::NotConnected));
    }
}

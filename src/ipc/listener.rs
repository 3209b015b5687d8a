//! Host side of the target channel.
//!
//! Each accepted connection becomes the attached execution target. Requests
//! flow out through a writer task fed by the connection manager; replies are
//! read on the connection task and handed to the dispatcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::bridge::Dispatcher;
use crate::ipc::framing::{read_message, write_message};
use crate::ipc::IpcError;
use crate::models::{InboundReply, OutboundRequest};

/// Unix socket the execution target connects to.
///
/// The socket file is removed when the listener is dropped.
pub struct TargetListener {
    listener: UnixListener,
    path: PathBuf,
    dispatcher: Arc<Dispatcher>,
}

impl TargetListener {
    /// Bind `path`, replacing a stale socket file left by an earlier run.
    pub fn bind(path: &Path, dispatcher: Arc<Dispatcher>) -> Result<Self, IpcError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|source| IpcError::Bind {
                path: path.to_path_buf(),
                source,
            })?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IpcError::Bind {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let listener = UnixListener::bind(path).map_err(|source| IpcError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Listening for execution target");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            dispatcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the task is cancelled.
    pub async fn run(&self) -> Result<(), IpcError> {
        loop {
            let (stream, _) = self.listener.accept().await?;
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                serve_connection(stream, dispatcher).await;
            });
        }
    }
}

impl Drop for TargetListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn serve_connection(stream: UnixStream, dispatcher: Arc<Dispatcher>) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundRequest>();
    let token = dispatcher.connection().attach(tx);

    // Ends once the connection manager drops the sender (detach or replacement).
    let writer = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let body = match serde_json::to_string(&request) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(id = %request.id, error = %e, "Failed to encode request");
                    continue;
                }
            };
            if let Err(e) = write_message(&mut write_half, &body).await {
                tracing::warn!(error = %e, "Failed to write to execution target");
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    loop {
        match read_message(&mut reader).await {
            Ok(Some(body)) => match serde_json::from_str::<InboundReply>(&body) {
                Ok(reply) => {
                    dispatcher.handle_reply(reply);
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring malformed reply"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Execution target connection failed");
                break;
            }
        }
    }

    dispatcher.connection().detach(token);
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ConnectionManager, TimeoutPolicy};
    use serde_json::json;
    use std::time::Duration;

    async fn wait_until_attached(dispatcher: &Dispatcher, attached: bool) {
        for _ in 0..200 {
            if dispatcher.status().attached == attached {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("attachment never became {}", attached);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");
        std::fs::write(&path, b"stale").unwrap();

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ConnectionManager::new()),
            TimeoutPolicy::default(),
        ));
        let listener = TargetListener::bind(&path, dispatcher).unwrap();
        assert_eq!(listener.path(), path.as_path());

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_connection_attaches_and_relays_replies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ConnectionManager::new()),
            TimeoutPolicy::default(),
        ));
        let listener = TargetListener::bind(&path, Arc::clone(&dispatcher)).unwrap();
        let server = tokio::spawn(async move { listener.run().await });

        let stream = UnixStream::connect(&path).await.unwrap();
        wait_until_attached(&dispatcher, true).await;

        // Echo target written directly against the framing.
        let (read_half, mut write_half) = stream.into_split();
        let target = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let body = read_message(&mut reader).await.unwrap().unwrap();
            let request: OutboundRequest = serde_json::from_str(&body).unwrap();
            let reply = InboundReply::success(request.id, json!({"echo": request.command}));
            write_message(&mut write_half, &serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();
        });

        let result = dispatcher.submit("get-node", json!({}), None).await;
        assert_eq!(result, Ok(json!({"echo": "get-node"})));
        target.await.unwrap();

        // Target hung up.
        wait_until_attached(&dispatcher, false).await;
        server.abort();
    }
}

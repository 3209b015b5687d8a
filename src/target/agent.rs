//! Request handling on the execution target.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::batch::{BatchExecutor, DocumentRuntime, RetryPolicy};
use crate::ipc::{read_message, write_message, IpcError};
use crate::models::{CommandSpec, InboundReply, OutboundRequest, BATCH_COMMAND};

/// Answers host requests against a [`DocumentRuntime`].
pub struct TargetAgent<R: DocumentRuntime> {
    runtime: Arc<R>,
    executor: BatchExecutor<R>,
}

impl<R: DocumentRuntime + 'static> TargetAgent<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self {
            executor: BatchExecutor::new(Arc::clone(&runtime)),
            runtime,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.executor = self.executor.with_retry(retry);
        self
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Run one request and build its reply. Never fails; errors go in the reply.
    pub async fn handle(&self, request: OutboundRequest) -> InboundReply {
        let args = request.args_map();
        let outcome = if request.command == BATCH_COMMAND {
            self.run_batch(args.get("commands")).await
        } else {
            self.runtime
                .run_command(&request.command, &args)
                .await
                .map_err(|e| e.to_string())
        };

        match outcome {
            Ok(result) => InboundReply::success(request.id, result),
            Err(error) => {
                tracing::debug!(id = %request.id, command = %request.command, %error, "Command failed");
                InboundReply::failure(request.id, error)
            }
        }
    }

    async fn run_batch(&self, commands: Option<&Value>) -> Result<Value, String> {
        let commands: Vec<CommandSpec> = match commands {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| format!("Invalid batch commands: {}", e))?,
            None => return Err("Batch is missing 'commands'".to_string()),
        };

        let outcome = self.executor.execute(commands).await.map_err(|e| {
            let created = e.created().len();
            if created > 0 {
                format!("{} ({} entities were created before the failure)", e, created)
            } else {
                e.to_string()
            }
        })?;
        Ok(json!(outcome))
    }

    /// Serve requests from the host until it hangs up.
    ///
    /// Requests run concurrently; replies are written in completion order.
    pub async fn serve(self: Arc<Self>, stream: UnixStream) -> Result<(), IpcError> {
        let (read_half, mut write_half) = stream.into_split();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<InboundReply>();

        let writer = tokio::spawn(async move {
            while let Some(reply) = reply_rx.recv().await {
                let body = match serde_json::to_string(&reply) {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::error!(id = %reply.id, error = %e, "Failed to encode reply");
                        continue;
                    }
                };
                if let Err(e) = write_message(&mut write_half, &body).await {
                    tracing::warn!(error = %e, "Failed to write reply to host");
                    break;
                }
            }
        });

        let mut reader = BufReader::new(read_half);
        let result = loop {
            let body = match read_message(&mut reader).await {
                Ok(Some(body)) => body,
                Ok(None) => break Ok(()),
                Err(e) => break Err(IpcError::Protocol(e.to_string())),
            };
            let request: OutboundRequest = match serde_json::from_str(&body) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed request");
                    continue;
                }
            };

            tracing::debug!(id = %request.id, command = %request.command, "Request received");
            let agent = Arc::clone(&self);
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let reply = agent.handle(request).await;
                let _ = reply_tx.send(reply);
            });
        };

        tracing::info!("Host connection closed");
        drop(reply_tx);
        writer.abort();
        result
    }
}

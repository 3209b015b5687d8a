//! HTTP front door for short-lived clients.
//!
//! - `GET  /status`  → [`StatusReport`]
//! - `POST /execute` → `{"result": ...}` for one command
//! - `POST /batch`   → `{"count", "entities"}` for a batch
//!
//! Failures are `{"error", "code"}` bodies with a status derived from the
//! [`BridgeError`] kind.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::bridge::{BridgeError, Dispatcher};
use crate::models::{
    BatchOutcome, BatchRequest, ExecuteRequest, ExecuteResponse, StatusReport,
};

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("{0}")]
    Input(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Input(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Bridge(BridgeError::NotConnected) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Bridge(BridgeError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Bridge(BridgeError::Remote(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Bridge(BridgeError::Protocol(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Input(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let code = match &self {
            ApiError::Bridge(err) => err.code(),
            ApiError::Input(_) => "input_error",
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });
        (status, body).into_response()
    }
}

pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/execute", post(execute))
        .route("/batch", post(batch))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn status(State(dispatcher): State<Arc<Dispatcher>>) -> Json<StatusReport> {
    Json(dispatcher.status())
}

async fn execute(
    State(dispatcher): State<Arc<Dispatcher>>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(request) = payload?;
    let command = request.command.trim();
    if command.is_empty() {
        return Err(ApiError::Input("command must not be empty".to_string()));
    }

    let result = dispatcher
        .submit(command, request.args, request.timeout_ms.map(Duration::from_millis))
        .await?;
    Ok(Json(ExecuteResponse { result }))
}

async fn batch(
    State(dispatcher): State<Arc<Dispatcher>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchOutcome>, ApiError> {
    let Json(request) = payload?;
    if let Some(index) = request
        .commands
        .iter()
        .position(|c| c.command.trim().is_empty())
    {
        return Err(ApiError::Input(format!(
            "commands[{}] has an empty command name",
            index
        )));
    }

    tracing::debug!(commands = request.commands.len(), "Submitting batch");
    let outcome = dispatcher
        .execute_batch(request.commands, request.timeout_ms.map(Duration::from_millis))
        .await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ConnectionManager, TimeoutPolicy};
    use crate::models::{InboundReply, OutboundRequest};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn detached() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            Arc::new(ConnectionManager::new()),
            TimeoutPolicy::default(),
        ))
    }

    /// Dispatcher wired to a fake target that answers via `reply`.
    fn attached<F>(reply: F) -> Arc<Dispatcher>
    where
        F: Fn(&OutboundRequest) -> InboundReply + Send + 'static,
    {
        let connection = Arc::new(ConnectionManager::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundRequest>();
        connection.attach(tx);
        let dispatcher = Arc::new(Dispatcher::new(connection, TimeoutPolicy::default()));

        let target = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                target.handle_reply(reply(&request));
            }
        });
        dispatcher
    }

    async fn request_json(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.expect("request failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn test_status_when_detached() {
        let router = build_router(detached());
        let request = Request::builder()
            .uri("/status")
            .body(Body::empty())
            .unwrap();

        let (status, body) = request_json(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"attached": false, "inFlight": 0}));
    }

    #[tokio::test]
    async fn test_execute_without_target_is_503() {
        let router = build_router(detached());
        let (status, body) =
            request_json(router, post("/execute", json!({"command": "get-node"}))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body,
            json!({"error": "No execution target is connected", "code": "not_connected"})
        );
    }

    #[tokio::test]
    async fn test_execute_success() {
        let dispatcher = attached(|request| {
            InboundReply::success(request.id.clone(), json!({"command": request.command}))
        });
        let router = build_router(dispatcher);

        let (status, body) = request_json(
            router,
            post("/execute", json!({"command": "get-node", "args": {"id": "1:1"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": {"command": "get-node"}}));
    }

    #[tokio::test]
    async fn test_remote_error_is_502() {
        let dispatcher =
            attached(|request| InboundReply::failure(request.id.clone(), "Node not found: 2:2"));
        let router = build_router(dispatcher);

        let (status, body) = request_json(
            router,
            post("/execute", json!({"command": "get-node", "args": {"id": "2:2"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], json!("Node not found: 2:2"));
        assert_eq!(body["code"], json!("remote_error"));
    }

    #[tokio::test]
    async fn test_timeout_is_504() {
        // Target that never answers.
        let connection = Arc::new(ConnectionManager::new());
        let (tx, _rx) = mpsc::unbounded_channel::<OutboundRequest>();
        connection.attach(tx);
        let router = build_router(Arc::new(Dispatcher::new(connection, TimeoutPolicy::default())));

        let (status, body) = request_json(
            router,
            post("/execute", json!({"command": "move-node", "timeoutMs": 20})),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["code"], json!("timeout"));
        assert_eq!(body["error"], json!("Command 'move-node' timed out after 20ms"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_422() {
        let router = build_router(detached());
        let (status, body) = request_json(router, post("/execute", json!({"args": {}}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], json!("input_error"));
    }

    #[tokio::test]
    async fn test_batch_rejects_empty_command_name() {
        let router = build_router(detached());
        let (status, body) = request_json(
            router,
            post("/batch", json!({"commands": [{"command": "create-frame"}, {"command": ""}]})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], json!("commands[1] has an empty command name"));
    }

    #[tokio::test]
    async fn test_batch_success() {
        let dispatcher = attached(|request| {
            let commands = request.args.as_ref().unwrap()["commands"].as_array().unwrap();
            let entities: Vec<Value> = (0..commands.len())
                .map(|i| json!({"id": format!("1:{}", i + 1), "name": "Frame"}))
                .collect();
            InboundReply::success(
                request.id.clone(),
                json!({"count": entities.len(), "entities": entities}),
            )
        });
        let router = build_router(dispatcher);

        let (status, body) = request_json(
            router,
            post(
                "/batch",
                json!({"commands": [
                    {"command": "create-frame", "args": {"ref": "a"}},
                    {"command": "create-frame", "args": {"parentRef": "a"}},
                ]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], json!(2));
        assert_eq!(body["entities"][1]["id"], json!("1:2"));
    }
}

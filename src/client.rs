//! HTTP client for the host's front door.
//!
//! Used by the one-shot CLI commands and the MCP server.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::http::ErrorResponse;
use crate::models::{
    BatchOutcome, BatchRequest, CommandSpec, ExecuteRequest, ExecuteResponse, StatusReport,
};

/// Slack on top of the command budget before the HTTP request itself gives up.
const TRANSPORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    /// The host could not be reached.
    #[error("Bridge host unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The host answered with an error body.
    #[error("{message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Invalid response from bridge host: {0}")]
    Decode(String),
}

impl ClientError {
    /// Machine-readable code: the server's code, or a local one.
    pub fn code(&self) -> &str {
        match self {
            ClientError::Unreachable { .. } => "unreachable",
            ClientError::Server { code, .. } => code,
            ClientError::Decode(_) => "decode_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    heavy_budget: Duration,
}

impl BridgeClient {
    /// `heavy_budget` bounds how long a request without an explicit timeout
    /// is allowed to take on the wire.
    pub fn new(base_url: impl Into<String>, heavy_budget: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            heavy_budget,
        }
    }

    /// Host base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the host whether an execution target is attached.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Unreachable` if the host does not answer within
    /// the transport grace period.
    pub async fn status(&self) -> Result<StatusReport, ClientError> {
        let url = format!("{}/status", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(TRANSPORT_GRACE)
            .send()
            .await
            .map_err(|source| ClientError::Unreachable { url, source })?;
        decode(response).await
    }

    /// Run one command on the execution target and return its result.
    ///
    /// `timeout` overrides the host's light/heavy budget for this command.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Server` carrying the host's error code, e.g.
    /// `not_connected`, `timeout` or `remote_error`, or
    /// `ClientError::Unreachable` if the host cannot be reached at all.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = BridgeClient::new("http://127.0.0.1:3055", Duration::from_secs(120));
    /// let frame = client.execute("create-frame", json!({"name": "Card"}), None).await?;
    /// ```
    pub async fn execute(
        &self,
        command: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        let body = ExecuteRequest {
            command: command.to_string(),
            args,
            timeout_ms: timeout.map(|t| t.as_millis() as u64),
        };
        let response: ExecuteResponse = self.post("/execute", &body, timeout).await?;
        Ok(response.result)
    }

    /// Create many entities in one round trip.
    ///
    /// # Errors
    ///
    /// Same as [`BridgeClient::execute`]. A batch that fails partway is a
    /// `remote_error`; entities created before the failure remain.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let outcome = client
    ///     .execute_batch(vec![
    ///         CommandSpec::new("create-frame", json!({"ref": "card"})),
    ///         CommandSpec::new("create-text", json!({"parentRef": "card", "text": "Hi"})),
    ///     ], None)
    ///     .await?;
    /// assert_eq!(outcome.count, 2);
    /// ```
    pub async fn execute_batch(
        &self,
        commands: Vec<CommandSpec>,
        timeout: Option<Duration>,
    ) -> Result<BatchOutcome, ClientError> {
        let body = BatchRequest {
            commands,
            timeout_ms: timeout.map(|t| t.as_millis() as u64),
        };
        self.post("/batch", &body, timeout).await
    }

    async fn post<B, T>(&self, path: &str, body: &B, timeout: Option<Duration>) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .timeout(timeout.unwrap_or(self.heavy_budget) + TRANSPORT_GRACE)
            .send()
            .await
            .map_err(|source| ClientError::Unreachable { url, source })?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))?;

    if status.is_success() {
        return serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()));
    }

    match serde_json::from_slice::<ErrorResponse>(&bytes) {
        Ok(err) => Err(ClientError::Server {
            status: status.as_u16(),
            code: err.code,
            message: err.error,
        }),
        Err(_) => Err(ClientError::Server {
            status: status.as_u16(),
            code: "http_error".to_string(),
            message: String::from_utf8_lossy(&bytes).into_owned(),
        }),
    }
}

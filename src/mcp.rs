//! Tool-call server for agents: JSON-RPC 2.0 over stdio, one message per line.
//!
//! Every `tools/call` becomes exactly one `execute` call on the bridge. Command
//! failures are reported inside the tool result (`isError: true`) rather than
//! as JSON-RPC errors, so the agent sees the message and can react to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::client::BridgeClient;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

// =============================================================================
// Tool catalog
// =============================================================================

struct ToolSpec {
    name: &'static str,
    description: &'static str,
    required: &'static [&'static str],
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "create-frame",
        description: "Create a frame. Accepts name, x, y, width, height, parentId, layoutMode, itemSpacing, padding.",
        required: &[],
    },
    ToolSpec {
        name: "create-rect",
        description: "Create a rectangle. Accepts name, x, y, width, height, parentId.",
        required: &[],
    },
    ToolSpec {
        name: "create-ellipse",
        description: "Create an ellipse. Accepts name, x, y, width, height, parentId.",
        required: &[],
    },
    ToolSpec {
        name: "create-text",
        description: "Create a text node. Accepts text, name, x, y, parentId.",
        required: &["text"],
    },
    ToolSpec {
        name: "get-node",
        description: "Read a node by id.",
        required: &["id"],
    },
    ToolSpec {
        name: "list-nodes",
        description: "List the top-level nodes of the current page.",
        required: &[],
    },
    ToolSpec {
        name: "move-node",
        description: "Move a node to x, y.",
        required: &["id"],
    },
    ToolSpec {
        name: "resize-node",
        description: "Resize a node to width, height.",
        required: &["id"],
    },
    ToolSpec {
        name: "delete-node",
        description: "Delete a node and its subtree.",
        required: &["id"],
    },
    ToolSpec {
        name: "export-node",
        description: "Export a node. Accepts id and format (PNG, SVG, PDF).",
        required: &["id"],
    },
    ToolSpec {
        name: "execute-batch",
        description: "Create many related nodes in one round trip. Each entry of commands is \
                      {command, args}; args may carry ref, parentRef, parentId and index.",
        required: &["commands"],
    },
];

/// The static tool list returned by `tools/list`.
pub fn tool_catalog() -> Vec<Value> {
    TOOLS
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": {
                    "type": "object",
                    "required": tool.required,
                    "additionalProperties": true,
                },
            })
        })
        .collect()
}

// =============================================================================
// Server
// =============================================================================

/// Something that can run one bridged command.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn execute(&self, command: &str, args: Value) -> Result<Value, String>;
}

#[async_trait]
impl ToolBackend for BridgeClient {
    async fn execute(&self, command: &str, args: Value) -> Result<Value, String> {
        BridgeClient::execute(self, command, args, None)
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct McpServer<B> {
    backend: B,
}

impl<B: ToolBackend> McpServer<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Read requests from `reader` until EOF, writing one response line each.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut encoded = serde_json::to_string(&response)?;
                encoded.push('\n');
                writer.write_all(encoded.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        tracing::info!("stdin closed, MCP server exiting");
        Ok(())
    }

    /// Handle one raw line. `None` means nothing should be written back.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
                ))
            }
        };

        let id = value.get("id").cloned();
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return id.map(|id| {
                    JsonRpcResponse::failure(
                        id,
                        JsonRpcError::new(INVALID_REQUEST, format!("Invalid request: {}", e)),
                    )
                })
            }
        };
        self.handle(request).await
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            tracing::debug!(method = %request.method, "Notification");
            return None;
        };

        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize(request.params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_catalog() })),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        json!({
            "protocolVersion": version,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "tools/call requires a tool name"))?;
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args @ Value::Object(_)) => args.clone(),
            Some(_) => {
                return Err(JsonRpcError::new(
                    INVALID_PARAMS,
                    "tools/call arguments must be an object",
                ))
            }
        };

        tracing::debug!(tool = name, "Tool call");
        let (text, is_error) = match self.backend.execute(name, arguments).await {
            Ok(Value::String(text)) => (text, false),
            Ok(result) => (
                serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string()),
                false,
            ),
            Err(message) => (message, true),
        };

        Ok(json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error,
        }))
    }
}

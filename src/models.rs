//! Data models shared by the host, the execution target and the clients.
//!
//! Everything here is plain serde data. Field names are camelCase on the wire
//! so the same envelopes can be produced by a non-Rust execution target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the wire command that runs a batch on the execution target.
pub const BATCH_COMMAND: &str = "execute-batch";

// =============================================================================
// Target channel envelopes
// =============================================================================

/// Request sent from the host to the execution target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Correlation ID, echoed back in the reply.
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl OutboundRequest {
    pub fn new(id: impl Into<String>, command: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: if args.is_null() { None } else { Some(args) },
        }
    }

    /// Arguments as an object map. Missing or non-object args yield an empty map.
    pub fn args_map(&self) -> Map<String, Value> {
        match &self.args {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// Reply sent from the execution target to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundReply {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InboundReply {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Convert into the caller-facing outcome.
    ///
    /// An `error` always wins; a missing `result` is treated as `null`.
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// =============================================================================
// Batch data
// =============================================================================

/// One entity-creation command inside a batch.
///
/// The batch-local keys `ref`, `parentRef`, `parentId` and `index` live inside
/// `args` alongside the command's own arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            command: command.into(),
            args,
        }
    }

    /// Symbolic name the caller assigned to the entity this command creates.
    pub fn ref_name(&self) -> Option<&str> {
        self.string_arg("ref")
    }

    pub fn parent_ref(&self) -> Option<&str> {
        self.string_arg("parentRef")
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.string_arg("parentId")
    }

    /// Insert position under the parent, if requested.
    pub fn insert_index(&self) -> Option<usize> {
        self.args
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }

    fn string_arg(&self, key: &str) -> Option<&str> {
        self.args
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Identity of a created entity as reported back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl EntityRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Result of a whole batch: one entity per input command, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub count: usize,
    pub entities: Vec<EntityRef>,
}

impl From<Vec<EntityRef>> for BatchOutcome {
    fn from(entities: Vec<EntityRef>) -> Self {
        Self {
            count: entities.len(),
            entities,
        }
    }
}

// =============================================================================
// HTTP bodies
// =============================================================================

/// Body of `POST /execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub command: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Body of `POST /batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub commands: Vec<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Successful `POST /execute` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub result: Value,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub attached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub in_flight: usize,
}

//! The seam between the batch executor and the document it edits.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::batch::LayoutConfig;
use crate::models::EntityRef;

/// Failure reported by the document runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArgs { command: String, reason: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("{0}")]
    Failed(String),
}

/// Entity kinds that have a fast-path constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Frame,
    Rectangle,
    Ellipse,
    Text,
}

impl PrimitiveKind {
    /// Map a creation command onto its fast-path constructor, if it has one.
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "create-frame" => Some(PrimitiveKind::Frame),
            "create-rect" | "create-rectangle" => Some(PrimitiveKind::Rectangle),
            "create-ellipse" => Some(PrimitiveKind::Ellipse),
            "create-text" => Some(PrimitiveKind::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::Frame => "FRAME",
            PrimitiveKind::Rectangle => "RECTANGLE",
            PrimitiveKind::Ellipse => "ELLIPSE",
            PrimitiveKind::Text => "TEXT",
        }
    }

    /// Only containers can carry a layout.
    pub fn is_container(&self) -> bool {
        matches!(self, PrimitiveKind::Frame)
    }
}

/// Document operations the batch executor needs from the execution target.
///
/// `Node` is the runtime's in-process handle for an entity. Lookups by ID may
/// lag behind creation elsewhere in the document (eventual consistency), so
/// [`DocumentRuntime::lookup`] returning `None` is not proof of absence.
#[async_trait]
pub trait DocumentRuntime: Send + Sync {
    type Node: Clone + Send + Sync;

    /// Build an entity directly, without attaching it anywhere.
    async fn create_primitive(
        &self,
        kind: PrimitiveKind,
        args: &Map<String, Value>,
    ) -> Result<Self::Node, RuntimeError>;

    /// Run a command through the full single-command path.
    ///
    /// Creation commands place their own entity (honouring `parentId`) and
    /// return its `{id, name}`.
    async fn run_command(&self, command: &str, args: &Map<String, Value>)
        -> Result<Value, RuntimeError>;

    async fn lookup(&self, id: &str) -> Option<Self::Node>;

    fn identity(&self, node: &Self::Node) -> EntityRef;

    async fn append_child(&self, parent: &Self::Node, child: &Self::Node)
        -> Result<(), RuntimeError>;

    async fn insert_child(
        &self,
        parent: &Self::Node,
        child: &Self::Node,
        index: usize,
    ) -> Result<(), RuntimeError>;

    /// Attach to the default top-level container (the current page).
    async fn attach_to_default(&self, child: &Self::Node) -> Result<(), RuntimeError>;

    async fn apply_layout(&self, node: &Self::Node, layout: &LayoutConfig)
        -> Result<(), RuntimeError>;

    /// Close the current undo step so everything since the last commit undoes together.
    async fn commit(&self, label: &str) -> Result<(), RuntimeError>;
}

//! In-memory sandbox document.
//!
//! Just enough of a document model to exercise the bridge: a flat node map
//! with parent/child links, one page acting as the default container, and
//! hug-contents auto-layout. Nodes can be seeded as lagging to reproduce
//! eventual-consistency visibility.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::batch::{DocumentRuntime, LayoutConfig, LayoutMode, PrimitiveKind, RuntimeError};
use crate::models::EntityRef;

/// Handle to a node in a [`MemoryDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryNode(String);

impl MemoryNode {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Point-in-time copy of a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// One auto-layout application, as observed when it ran.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutEvent {
    pub node_id: String,
    /// `(width, height)` of each child at the moment the layout was applied.
    pub child_sizes: Vec<(f64, f64)>,
    pub size: (f64, f64),
}

#[derive(Default)]
struct DocState {
    nodes: HashMap<String, NodeSnapshot>,
    /// Top-level children of the current page, in order.
    page: Vec<String>,
    next_id: u64,
    /// Remaining lookups for which a node stays invisible.
    lagging: HashMap<String, u32>,
    layouts: Vec<LayoutEvent>,
    commits: Vec<String>,
}

impl DocState {
    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("1:{}", self.next_id)
    }

    fn detach(&mut self, id: &str) {
        let parent = self.nodes.get(id).and_then(|n| n.parent.clone());
        match parent {
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.retain(|c| c != id);
                }
            }
            None => self.page.retain(|c| c != id),
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = None;
        }
    }

    fn place(&mut self, child: &str, parent: Option<&str>, index: Option<usize>) -> Result<(), RuntimeError> {
        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent) {
                return Err(RuntimeError::NodeNotFound(parent.to_string()));
            }
            if parent == child || self.is_ancestor(child, parent) {
                return Err(RuntimeError::Failed(format!(
                    "Cannot move {} into its own subtree",
                    child
                )));
            }
        }
        if !self.nodes.contains_key(child) {
            return Err(RuntimeError::NodeNotFound(child.to_string()));
        }

        self.detach(child);
        let siblings = match parent {
            Some(parent) => match self.nodes.get_mut(parent) {
                Some(p) => &mut p.children,
                None => return Err(RuntimeError::NodeNotFound(parent.to_string())),
            },
            None => &mut self.page,
        };
        let at = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(at, child.to_string());

        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = parent.map(str::to_string);
        }
        Ok(())
    }

    /// Whether `ancestor` is above `node` in the tree.
    fn is_ancestor(&self, ancestor: &str, node: &str) -> bool {
        let mut current = self.nodes.get(node).and_then(|n| n.parent.clone());
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent.clone());
        }
        false
    }

    fn node(&self, id: &str) -> Result<&NodeSnapshot, RuntimeError> {
        self.nodes
            .get(id)
            .ok_or_else(|| RuntimeError::NodeNotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut NodeSnapshot, RuntimeError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NodeNotFound(id.to_string()))
    }

    fn remove_subtree(&mut self, id: &str) {
        self.detach(id);
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
            self.lagging.remove(&current);
        }
    }
}

/// Sandbox document used by `canvas-bridge sandbox` and the test suite.
#[derive(Default)]
pub struct MemoryDocument {
    state: Mutex<DocState>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DocState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a top-level frame that stays invisible to the next `hidden_lookups`
    /// lookups, as if still replicating from elsewhere in the document.
    pub fn seed_lagging_frame(&self, name: &str, hidden_lookups: u32) -> String {
        let mut state = self.lock();
        let id = state.fresh_id();
        state.nodes.insert(
            id.clone(),
            new_node(&id, PrimitiveKind::Frame.as_str(), name, &Map::new()),
        );
        state.page.push(id.clone());
        if hidden_lookups > 0 {
            state.lagging.insert(id.clone(), hidden_lookups);
        }
        id
    }

    pub fn node(&self, id: &str) -> Option<NodeSnapshot> {
        self.lock().nodes.get(id).cloned()
    }

    /// Top-level children of the page, in order.
    pub fn page_children(&self) -> Vec<String> {
        self.lock().page.clone()
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn layout_events(&self) -> Vec<LayoutEvent> {
        self.lock().layouts.clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.lock().commits.clone()
    }

    fn create_node(&self, kind: &str, args: &Map<String, Value>) -> MemoryNode {
        let mut state = self.lock();
        let id = state.fresh_id();
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default_name(kind));
        state.nodes.insert(id.clone(), new_node(&id, kind, &name, args));
        MemoryNode(id)
    }

    /// Create and place in one step, the way single commands do.
    fn create_and_place(
        &self,
        kind: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, RuntimeError> {
        let parent = args.get("parentId").and_then(Value::as_str);
        let index = args.get("index").and_then(Value::as_u64).map(|i| i as usize);

        if let Some(parent) = parent {
            if !self.lock().nodes.contains_key(parent) {
                return Err(RuntimeError::NodeNotFound(parent.to_string()));
            }
        }

        let node = self.create_node(kind, args);
        let mut state = self.lock();
        state.place(node.id(), parent, index)?;
        let snapshot = state.node(node.id())?;
        Ok(json!({"id": snapshot.id, "name": snapshot.name}))
    }

    fn layout_now(&self, id: &str, layout: &LayoutConfig) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        let children = state.node(id)?.children.clone();
        let child_sizes: Vec<(f64, f64)> = children
            .iter()
            .filter_map(|c| state.nodes.get(c).map(|n| (n.width, n.height)))
            .collect();

        let gaps = layout.item_spacing * child_sizes.len().saturating_sub(1) as f64;
        let pad = layout.padding * 2.0;
        let (along, across): (Vec<f64>, Vec<f64>) = match layout.mode {
            LayoutMode::Horizontal => child_sizes.iter().copied().unzip(),
            LayoutMode::Vertical => child_sizes.iter().map(|&(w, h)| (h, w)).unzip(),
        };
        let main = along.iter().sum::<f64>() + gaps + pad;
        let cross = across.iter().copied().fold(0.0, f64::max) + pad;

        // Position children along the main axis.
        let mut offset = layout.padding;
        for (child, length) in children.iter().zip(along.iter()) {
            if let Some(node) = state.nodes.get_mut(child) {
                match layout.mode {
                    LayoutMode::Horizontal => {
                        node.x = offset;
                        node.y = layout.padding;
                    }
                    LayoutMode::Vertical => {
                        node.x = layout.padding;
                        node.y = offset;
                    }
                }
            }
            offset += length + layout.item_spacing;
        }

        let size = match layout.mode {
            LayoutMode::Horizontal => (main, cross),
            LayoutMode::Vertical => (cross, main),
        };
        let node = state.node_mut(id)?;
        node.width = size.0;
        node.height = size.1;

        state.layouts.push(LayoutEvent {
            node_id: id.to_string(),
            child_sizes,
            size,
        });
        Ok(())
    }
}

fn default_name(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
        None => "Node".to_string(),
    }
}

fn new_node(id: &str, kind: &str, name: &str, args: &Map<String, Value>) -> NodeSnapshot {
    let number = |key: &str, default: f64| args.get(key).and_then(Value::as_f64).unwrap_or(default);
    let text = if kind == PrimitiveKind::Text.as_str() {
        Some(
            args.get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        )
    } else {
        None
    };
    // Text sizes to its content unless told otherwise.
    let (default_w, default_h) = match &text {
        Some(t) => (8.0 * t.chars().count() as f64, 16.0),
        None => (100.0, 100.0),
    };

    NodeSnapshot {
        id: id.to_string(),
        name: name.to_string(),
        kind: kind.to_string(),
        parent: None,
        children: Vec::new(),
        x: number("x", 0.0),
        y: number("y", 0.0),
        width: number("width", default_w),
        height: number("height", default_h),
        text,
    }
}

fn required_id<'a>(command: &str, args: &'a Map<String, Value>) -> Result<&'a str, RuntimeError> {
    args.get("id")
        .or_else(|| args.get("nodeId"))
        .and_then(Value::as_str)
        .ok_or_else(|| RuntimeError::InvalidArgs {
            command: command.to_string(),
            reason: "missing 'id'".to_string(),
        })
}

#[async_trait]
impl DocumentRuntime for MemoryDocument {
    type Node = MemoryNode;

    async fn create_primitive(
        &self,
        kind: PrimitiveKind,
        args: &Map<String, Value>,
    ) -> Result<MemoryNode, RuntimeError> {
        Ok(self.create_node(kind.as_str(), args))
    }

    async fn run_command(
        &self,
        command: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, RuntimeError> {
        if let Some(kind) = PrimitiveKind::from_command(command) {
            let result = self.create_and_place(kind.as_str(), args)?;
            if kind.is_container() {
                if let (Some(layout), Some(id)) = (
                    LayoutConfig::from_args(args),
                    result.get("id").and_then(Value::as_str),
                ) {
                    self.layout_now(id, &layout)?;
                }
            }
            return Ok(result);
        }

        match command {
            "create-polygon" => self.create_and_place("POLYGON", args),
            "create-star" => self.create_and_place("STAR", args),
            "create-line" => self.create_and_place("LINE", args),
            "get-node" => {
                let id = required_id(command, args)?;
                let state = self.lock();
                serde_json::to_value(state.node(id)?)
                    .map_err(|e| RuntimeError::Failed(e.to_string()))
            }
            "list-nodes" => {
                let state = self.lock();
                let nodes: Vec<Value> = state
                    .page
                    .iter()
                    .filter_map(|id| state.nodes.get(id))
                    .map(|n| json!({"id": n.id, "name": n.name, "kind": n.kind}))
                    .collect();
                Ok(json!({ "nodes": nodes }))
            }
            "move-node" => {
                let id = required_id(command, args)?;
                let mut state = self.lock();
                let node = state.node_mut(id)?;
                node.x = args.get("x").and_then(Value::as_f64).unwrap_or(node.x);
                node.y = args.get("y").and_then(Value::as_f64).unwrap_or(node.y);
                Ok(json!({"id": node.id, "x": node.x, "y": node.y}))
            }
            "resize-node" => {
                let id = required_id(command, args)?;
                let mut state = self.lock();
                let node = state.node_mut(id)?;
                node.width = args.get("width").and_then(Value::as_f64).unwrap_or(node.width);
                node.height = args.get("height").and_then(Value::as_f64).unwrap_or(node.height);
                Ok(json!({"id": node.id, "width": node.width, "height": node.height}))
            }
            "delete-node" => {
                let id = required_id(command, args)?.to_string();
                let mut state = self.lock();
                state.node(&id)?;
                state.remove_subtree(&id);
                Ok(json!({"id": id, "deleted": true}))
            }
            "export-node" => {
                let id = required_id(command, args)?;
                let format = args
                    .get("format")
                    .and_then(Value::as_str)
                    .unwrap_or("PNG")
                    .to_uppercase();
                let state = self.lock();
                let node = state.node(id)?;
                Ok(json!({
                    "id": node.id,
                    "format": format,
                    "width": node.width,
                    "height": node.height,
                }))
            }
            other => Err(RuntimeError::UnknownCommand(other.to_string())),
        }
    }

    async fn lookup(&self, id: &str) -> Option<MemoryNode> {
        let mut state = self.lock();
        if let Some(remaining) = state.lagging.get_mut(id) {
            *remaining -= 1;
            if *remaining == 0 {
                state.lagging.remove(id);
            }
            return None;
        }
        state.nodes.contains_key(id).then(|| MemoryNode(id.to_string()))
    }

    fn identity(&self, node: &MemoryNode) -> EntityRef {
        let name = self
            .lock()
            .nodes
            .get(node.id())
            .map(|n| n.name.clone())
            .unwrap_or_default();
        EntityRef::new(node.id(), name)
    }

    async fn append_child(
        &self,
        parent: &MemoryNode,
        child: &MemoryNode,
    ) -> Result<(), RuntimeError> {
        self.lock().place(child.id(), Some(parent.id()), None)
    }

    async fn insert_child(
        &self,
        parent: &MemoryNode,
        child: &MemoryNode,
        index: usize,
    ) -> Result<(), RuntimeError> {
        self.lock().place(child.id(), Some(parent.id()), Some(index))
    }

    async fn attach_to_default(&self, child: &MemoryNode) -> Result<(), RuntimeError> {
        self.lock().place(child.id(), None, None)
    }

    async fn apply_layout(
        &self,
        node: &MemoryNode,
        layout: &LayoutConfig,
    ) -> Result<(), RuntimeError> {
        self.layout_now(node.id(), layout)
    }

    async fn commit(&self, label: &str) -> Result<(), RuntimeError> {
        self.lock().commits.push(label.to_string());
        Ok(())
    }
}

//! Planning phase: resolve symbolic references before anything is created.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::batch::PrimitiveKind;
use crate::models::CommandSpec;

/// Argument keys that belong to the batch protocol, not to the command.
const BATCH_KEYS: &[&str] = &["ref", "parentRef", "parentId", "index"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Batch command #{index} has an empty command name")]
    EmptyCommand { index: usize },
}

/// Axis of an auto-sizing layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    Horizontal,
    Vertical,
}

/// Auto-sizing layout requested on a container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    pub mode: LayoutMode,
    pub item_spacing: f64,
    pub padding: f64,
}

impl LayoutConfig {
    /// Read `layoutMode`, `itemSpacing` and `padding` from command args.
    ///
    /// Returns `None` when no layout (or `"NONE"`) was requested.
    pub fn from_args(args: &Map<String, Value>) -> Option<Self> {
        let mode = match args.get("layoutMode").and_then(Value::as_str) {
            Some(m) if m.eq_ignore_ascii_case("horizontal") => LayoutMode::Horizontal,
            Some(m) if m.eq_ignore_ascii_case("vertical") => LayoutMode::Vertical,
            _ => return None,
        };
        let number = |key: &str| args.get(key).and_then(Value::as_f64).unwrap_or(0.0).max(0.0);
        Some(Self {
            mode,
            item_spacing: number("itemSpacing"),
            padding: number("padding"),
        })
    }
}

/// How an entity will be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    /// Built directly by the fast-path constructor; placed by the executor.
    Primitive(PrimitiveKind),
    /// Sent through the full single-command path, then placed by the executor
    /// like any other entity.
    Command,
}

/// Requested parent, as far as it can be known before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentLink {
    /// No parent requested.
    Root,
    /// An entity created earlier in this batch, by position.
    Batch(usize),
    /// A real ID given by the caller.
    Id(String),
    /// A `parentRef` that no earlier command declared. Treated as `Root`.
    UnresolvedRef(String),
}

/// Where an entity ends up attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentClass {
    /// Default top-level container.
    Root,
    /// Parent handle already cached from this batch.
    Internal,
    /// Parent assumed to exist outside the batch; resolved with retry.
    External,
}

/// One command of the batch after planning.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEntity {
    pub index: usize,
    pub command: String,
    /// Command arguments with the batch-protocol keys removed.
    pub args: Map<String, Value>,
    pub creation: Creation,
    pub ref_name: Option<String>,
    pub parent: ParentLink,
    pub insert_index: Option<usize>,
    /// Layout to apply once the whole batch exists. Only set for fast-path containers.
    pub layout: Option<LayoutConfig>,
}

/// Ordered, reference-resolved batch ready for execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    entities: Vec<PlannedEntity>,
}

impl BatchPlan {
    /// Plan `commands` in input order.
    ///
    /// A `parentRef` resolves only against refs declared by earlier commands;
    /// anything else leaves the entity at the root. A `parentId` is used only
    /// when no `parentRef` was given.
    pub fn build(commands: Vec<CommandSpec>) -> Result<Self, PlanError> {
        let mut refs: HashMap<String, usize> = HashMap::new();
        let mut entities = Vec::with_capacity(commands.len());

        for (index, spec) in commands.into_iter().enumerate() {
            let command = spec.command.trim().to_string();
            if command.is_empty() {
                return Err(PlanError::EmptyCommand { index });
            }

            let parent = match (spec.parent_ref(), spec.parent_id()) {
                (Some(parent_ref), _) => match refs.get(parent_ref) {
                    Some(&earlier) => ParentLink::Batch(earlier),
                    None => {
                        tracing::warn!(
                            index,
                            parent_ref,
                            "parentRef not declared earlier in batch, attaching at root"
                        );
                        ParentLink::UnresolvedRef(parent_ref.to_string())
                    }
                },
                (None, Some(parent_id)) => ParentLink::Id(parent_id.to_string()),
                (None, None) => ParentLink::Root,
            };

            let creation = match PrimitiveKind::from_command(&command) {
                Some(kind) => Creation::Primitive(kind),
                None => Creation::Command,
            };

            let layout = match creation {
                Creation::Primitive(kind) if kind.is_container() => {
                    LayoutConfig::from_args(&spec.args)
                }
                _ => None,
            };

            let ref_name = spec.ref_name().map(str::to_string);
            if let Some(name) = &ref_name {
                if refs.insert(name.clone(), index).is_some() {
                    tracing::warn!(index, ref_name = %name, "ref redeclared, later command wins");
                }
            }

            let insert_index = spec.insert_index();
            let mut args = spec.args;
            for key in BATCH_KEYS {
                args.remove(*key);
            }

            entities.push(PlannedEntity {
                index,
                command,
                args,
                creation,
                ref_name,
                parent,
                insert_index,
                layout,
            });
        }

        Ok(Self { entities })
    }

    pub fn entities(&self) -> &[PlannedEntity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn into_entities(self) -> Vec<PlannedEntity> {
        self.entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn spec(command: &str, args: Value) -> CommandSpec {
        CommandSpec::new(command, args)
    }

    #[test]
    fn test_parent_ref_resolves_to_earlier_entity() {
        let plan = BatchPlan::build(vec![
            spec("create-frame", json!({"ref": "f1", "name": "Card"})),
            spec("create-rect", json!({"parentRef": "f1", "width": 10})),
        ])
        .unwrap();

        let second = &plan.entities()[1];
        assert_eq!(second.parent, ParentLink::Batch(0));
        assert_eq!(second.creation, Creation::Primitive(PrimitiveKind::Rectangle));
        // Batch keys are stripped, command args kept.
        assert_eq!(second.args.get("parentRef"), None);
        assert_eq!(second.args.get("width"), Some(&json!(10)));
        assert_eq!(plan.entities()[0].ref_name.as_deref(), Some("f1"));
    }

    #[test]
    fn test_forward_ref_is_unresolved() {
        let plan = BatchPlan::build(vec![
            spec("create-rect", json!({"parentRef": "later"})),
            spec("create-frame", json!({"ref": "later"})),
        ])
        .unwrap();

        assert_eq!(
            plan.entities()[0].parent,
            ParentLink::UnresolvedRef("later".to_string())
        );
    }

    #[test]
    fn test_unresolved_ref_ignores_parent_id() {
        let plan = BatchPlan::build(vec![spec(
            "create-rect",
            json!({"parentRef": "missing", "parentId": "1:5"}),
        )])
        .unwrap();

        assert_eq!(
            plan.entities()[0].parent,
            ParentLink::UnresolvedRef("missing".to_string())
        );
    }

    #[test]
    fn test_parent_id_and_insert_index() {
        let plan = BatchPlan::build(vec![spec(
            "create-text",
            json!({"parentId": "12:34", "index": 0, "text": "hi"}),
        )])
        .unwrap();

        let entity = &plan.entities()[0];
        assert_eq!(entity.parent, ParentLink::Id("12:34".to_string()));
        assert_eq!(entity.insert_index, Some(0));
        assert_eq!(entity.args.get("index"), None);
    }

    #[test]
    fn test_layout_only_on_fast_path_containers() {
        let plan = BatchPlan::build(vec![
            spec("create-frame", json!({"layoutMode": "VERTICAL", "itemSpacing": 8, "padding": 4})),
            spec("create-frame", json!({"layoutMode": "NONE"})),
            spec("create-rect", json!({"layoutMode": "HORIZONTAL"})),
            spec("create-component", json!({"layoutMode": "HORIZONTAL"})),
        ])
        .unwrap();

        assert_eq!(
            plan.entities()[0].layout,
            Some(LayoutConfig {
                mode: LayoutMode::Vertical,
                item_spacing: 8.0,
                padding: 4.0,
            })
        );
        assert_eq!(plan.entities()[1].layout, None);
        assert_eq!(plan.entities()[2].layout, None);
        assert_eq!(plan.entities()[3].layout, None);
        assert_eq!(plan.entities()[3].creation, Creation::Command);
    }

    #[test]
    fn test_redeclared_ref_latest_wins() {
        let plan = BatchPlan::build(vec![
            spec("create-frame", json!({"ref": "a"})),
            spec("create-frame", json!({"ref": "a"})),
            spec("create-rect", json!({"parentRef": "a"})),
        ])
        .unwrap();

        assert_eq!(plan.entities()[2].parent, ParentLink::Batch(1));
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = BatchPlan::build(vec![spec("create-frame", json!({})), spec("  ", json!({}))])
            .unwrap_err();
        assert_eq!(err, PlanError::EmptyCommand { index: 1 });
    }

    #[test]
    fn test_empty_batch_is_valid() {
        let plan = BatchPlan::build(Vec::new()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
    }
}

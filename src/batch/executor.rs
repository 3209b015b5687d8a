//! Execution phase: create, attach, lay out, commit.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::batch::{
    attach_with_retry, AttachOutcome, AttachmentClass, BatchPlan, Creation, DocumentRuntime,
    LayoutConfig, ParentLink, PlanError, PlannedEntity, RetryPolicy, RuntimeError,
};
use crate::models::{BatchOutcome, CommandSpec, EntityRef};

/// Batch failure.
///
/// Entities created before a failing command stay created; there is no
/// rollback. `created` lists them so callers can clean up if they want to.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Batch command #{index} ({command}) failed: {source}")]
    CommandFailed {
        index: usize,
        command: String,
        created: Vec<EntityRef>,
        #[source]
        source: RuntimeError,
    },

    #[error("Batch command #{index} ({command}) did not return an entity id")]
    MissingIdentity {
        index: usize,
        command: String,
        created: Vec<EntityRef>,
    },

    #[error("Failed to finalize batch: {0}")]
    Finalize(#[source] RuntimeError),
}

impl BatchError {
    /// Entities that exist despite the failure.
    pub fn created(&self) -> &[EntityRef] {
        match self {
            BatchError::CommandFailed { created, .. }
            | BatchError::MissingIdentity { created, .. } => created,
            BatchError::Plan(_) | BatchError::Finalize(_) => &[],
        }
    }
}

/// Structural operation postponed until every entity in the batch exists.
struct DeferredOperation<N> {
    target: N,
    target_id: String,
    layout: LayoutConfig,
}

/// Placement of a batch entity, decided at creation time.
struct PendingAttachment<N> {
    child: N,
    class: AttachmentClass,
    parent_id: Option<String>,
    insert_index: Option<usize>,
}

/// Bookkeeping for one batch run.
struct RunState<N> {
    created: Vec<EntityRef>,
    node_cache: HashMap<String, N>,
    ref_table: HashMap<String, String>,
    attachments: Vec<PendingAttachment<N>>,
    deferred: Vec<DeferredOperation<N>>,
}

impl<N> RunState<N> {
    fn with_capacity(total: usize) -> Self {
        Self {
            created: Vec::with_capacity(total),
            node_cache: HashMap::new(),
            ref_table: HashMap::new(),
            attachments: Vec::new(),
            deferred: Vec::new(),
        }
    }
}

/// Runs batch plans against a [`DocumentRuntime`].
pub struct BatchExecutor<R: DocumentRuntime> {
    runtime: Arc<R>,
    retry: RetryPolicy,
}

impl<R: DocumentRuntime> BatchExecutor<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self {
            runtime,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Plan and run `commands`.
    pub async fn execute(&self, commands: Vec<CommandSpec>) -> Result<BatchOutcome, BatchError> {
        let plan = BatchPlan::build(commands)?;
        let entities = self.run(plan).await?;
        Ok(BatchOutcome::from(entities))
    }

    /// Run a plan and return one identity per planned command, in order.
    ///
    /// Every entity, fast-path or full-command, is placed during finalize so
    /// siblings keep input order and external parents get the retry helper.
    /// On a mid-batch failure the entities created so far are still attached
    /// before the error is returned, but nothing is committed.
    pub async fn run(&self, plan: BatchPlan) -> Result<Vec<EntityRef>, BatchError> {
        let total = plan.len();
        let mut state = RunState::with_capacity(total);

        for entity in plan.into_entities() {
            if let Err(err) = self.create_entity(entity, &mut state).await {
                let created = state.created.len();
                if let Err(e) = self
                    .finalize(state.attachments, state.deferred, &state.node_cache)
                    .await
                {
                    tracing::warn!(error = %e, "Could not attach entities from failed batch");
                }
                tracing::warn!(created, error = %err, "Batch aborted");
                return Err(err);
            }
        }

        tracing::debug!(entities = total, refs = ?state.ref_table, "Batch entities created");

        self.finalize(state.attachments, state.deferred, &state.node_cache)
            .await
            .map_err(BatchError::Finalize)?;

        self.runtime
            .commit(&format!("Batch of {} entities", total))
            .await
            .map_err(BatchError::Finalize)?;

        Ok(state.created)
    }

    async fn create_entity(
        &self,
        entity: PlannedEntity,
        state: &mut RunState<R::Node>,
    ) -> Result<(), BatchError> {
        let parent_id = match &entity.parent {
            ParentLink::Batch(earlier) => Some(state.created[*earlier].id.clone()),
            ParentLink::Id(id) => Some(id.clone()),
            ParentLink::Root | ParentLink::UnresolvedRef(_) => None,
        };

        let failed = |source: RuntimeError, created: &[EntityRef]| BatchError::CommandFailed {
            index: entity.index,
            command: entity.command.clone(),
            created: created.to_vec(),
            source,
        };

        let (node, identity) = match entity.creation {
            Creation::Primitive(kind) => {
                let node = self
                    .runtime
                    .create_primitive(kind, &entity.args)
                    .await
                    .map_err(|source| failed(source, &state.created))?;
                let identity = self.runtime.identity(&node);
                (Some(node), identity)
            }
            Creation::Command => {
                // Placement keys were stripped by the planner; the command lands
                // in the default container and is moved during finalize.
                let result = self
                    .runtime
                    .run_command(&entity.command, &entity.args)
                    .await
                    .map_err(|source| failed(source, &state.created))?;

                let identity =
                    identity_from_result(&result).ok_or_else(|| BatchError::MissingIdentity {
                        index: entity.index,
                        command: entity.command.clone(),
                        created: state.created.clone(),
                    })?;

                let node = self.runtime.lookup(&identity.id).await;
                if node.is_none() {
                    tracing::warn!(
                        id = %identity.id,
                        command = %entity.command,
                        "Created entity not visible yet, leaving it where the command put it"
                    );
                }
                (node, identity)
            }
        };

        if let Some(node) = node {
            let class = match &parent_id {
                None => AttachmentClass::Root,
                Some(id) if state.node_cache.contains_key(id) => AttachmentClass::Internal,
                Some(_) => AttachmentClass::External,
            };

            if let Some(layout) = entity.layout {
                state.deferred.push(DeferredOperation {
                    target: node.clone(),
                    target_id: identity.id.clone(),
                    layout,
                });
            }

            state.attachments.push(PendingAttachment {
                child: node.clone(),
                class,
                parent_id,
                insert_index: entity.insert_index,
            });
            state.node_cache.insert(identity.id.clone(), node);
        }

        if let Some(name) = entity.ref_name {
            state.ref_table.insert(name, identity.id.clone());
        }
        state.created.push(identity);
        Ok(())
    }

    async fn finalize(
        &self,
        attachments: Vec<PendingAttachment<R::Node>>,
        deferred: Vec<DeferredOperation<R::Node>>,
        node_cache: &HashMap<String, R::Node>,
    ) -> Result<(), RuntimeError> {
        let (internal, rest): (Vec<_>, Vec<_>) = attachments
            .into_iter()
            .partition(|a| a.class == AttachmentClass::Internal);

        for attachment in &internal {
            let parent = attachment
                .parent_id
                .as_ref()
                .and_then(|id| node_cache.get(id))
                .ok_or_else(|| {
                    RuntimeError::NodeNotFound(attachment.parent_id.clone().unwrap_or_default())
                })?;
            match attachment.insert_index {
                Some(index) => {
                    self.runtime
                        .insert_child(parent, &attachment.child, index)
                        .await?
                }
                None => self.runtime.append_child(parent, &attachment.child).await?,
            }
        }

        // Most recently created first, so containers size against finished children.
        for operation in deferred.iter().rev() {
            tracing::trace!(node = %operation.target_id, "Applying deferred layout");
            self.runtime
                .apply_layout(&operation.target, &operation.layout)
                .await?;
        }

        let (roots, external): (Vec<_>, Vec<_>) = rest
            .into_iter()
            .partition(|a| a.class == AttachmentClass::Root);

        for attachment in &roots {
            self.runtime.attach_to_default(&attachment.child).await?;
        }

        let mut degraded = 0usize;
        for attachment in &external {
            let parent_id = attachment.parent_id.as_deref().unwrap_or_default();
            let outcome = attach_with_retry(
                self.runtime.as_ref(),
                &attachment.child,
                parent_id,
                attachment.insert_index,
                &self.retry,
            )
            .await?;
            if outcome == AttachOutcome::Degraded {
                degraded += 1;
            }
        }

        if degraded > 0 {
            tracing::warn!(degraded, "Some batch entities were attached to the default container");
        }
        Ok(())
    }
}

/// Pull `{id, name}` out of a full-command result.
fn identity_from_result(result: &Value) -> Option<EntityRef> {
    let id = result.get("id").and_then(Value::as_str)?;
    let name = result.get("name").and_then(Value::as_str).unwrap_or_default();
    Some(EntityRef::new(id, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::PrimitiveKind;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use std::sync::Mutex;

    /// Runtime that records every call and can be told to fail one command.
    #[derive(Default)]
    struct RecordingRuntime {
        calls: Mutex<Vec<String>>,
        next_id: Mutex<u32>,
        fail_command: Option<String>,
    }

    impl RecordingRuntime {
        fn failing_on(command: &str) -> Self {
            Self {
                fail_command: Some(command.to_string()),
                ..Self::default()
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn fresh_id(&self) -> String {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("n{}", *next)
        }
    }

    #[async_trait]
    impl DocumentRuntime for RecordingRuntime {
        type Node = String;

        async fn create_primitive(
            &self,
            kind: PrimitiveKind,
            _args: &Map<String, Value>,
        ) -> Result<String, RuntimeError> {
            let id = self.fresh_id();
            self.record(format!("create {} {}", kind.as_str(), id));
            Ok(id)
        }

        async fn run_command(
            &self,
            command: &str,
            args: &Map<String, Value>,
        ) -> Result<Value, RuntimeError> {
            if self.fail_command.as_deref() == Some(command) {
                return Err(RuntimeError::Failed(format!("{} exploded", command)));
            }
            let id = self.fresh_id();
            let parent = args.get("parentId").and_then(Value::as_str).unwrap_or("-");
            self.record(format!("run {} {} parent={}", command, id, parent));
            Ok(json!({"id": id, "name": command}))
        }

        async fn lookup(&self, id: &str) -> Option<String> {
            id.starts_with('n').then(|| id.to_string())
        }

        fn identity(&self, node: &String) -> EntityRef {
            EntityRef::new(node.clone(), format!("node {}", node))
        }

        async fn append_child(&self, parent: &String, child: &String) -> Result<(), RuntimeError> {
            self.record(format!("append {} -> {}", child, parent));
            Ok(())
        }

        async fn insert_child(
            &self,
            parent: &String,
            child: &String,
            index: usize,
        ) -> Result<(), RuntimeError> {
            self.record(format!("insert {} -> {} @{}", child, parent, index));
            Ok(())
        }

        async fn attach_to_default(&self, child: &String) -> Result<(), RuntimeError> {
            self.record(format!("root {}", child));
            Ok(())
        }

        async fn apply_layout(
            &self,
            node: &String,
            _layout: &LayoutConfig,
        ) -> Result<(), RuntimeError> {
            self.record(format!("layout {}", node));
            Ok(())
        }

        async fn commit(&self, label: &str) -> Result<(), RuntimeError> {
            self.record(format!("commit {}", label));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_finalize_order() {
        let runtime = Arc::new(RecordingRuntime::default());
        let executor = BatchExecutor::new(Arc::clone(&runtime));

        let outcome = executor
            .execute(vec![
                CommandSpec::new("create-frame", json!({"ref": "outer", "layoutMode": "VERTICAL"})),
                CommandSpec::new(
                    "create-frame",
                    json!({"ref": "inner", "parentRef": "outer", "layoutMode": "HORIZONTAL"}),
                ),
                CommandSpec::new("create-rect", json!({"parentRef": "inner"})),
                CommandSpec::new("create-text", json!({"parentId": "n2", "index": 0})),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.count, 4);
        assert_eq!(
            runtime.calls(),
            vec![
                "create FRAME n1",
                "create FRAME n2",
                "create RECTANGLE n3",
                "create TEXT n4",
                // Internal attachments in creation order.
                "append n2 -> n1",
                "append n3 -> n2",
                "insert n4 -> n2 @0",
                // Deferred layouts, innermost first.
                "layout n2",
                "layout n1",
                "root n1",
                "commit Batch of 4 entities",
            ]
        );
    }

    #[tokio::test]
    async fn test_command_path_is_placed_during_finalize() {
        let runtime = Arc::new(RecordingRuntime::default());
        let executor = BatchExecutor::new(Arc::clone(&runtime));

        let outcome = executor
            .execute(vec![
                CommandSpec::new("create-frame", json!({"ref": "f"})),
                CommandSpec::new("create-rect", json!({"parentRef": "f"})),
                CommandSpec::new("create-polygon", json!({"parentRef": "f", "index": 0})),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.entities[2], EntityRef::new("n3", "create-polygon"));
        assert_eq!(
            runtime.calls(),
            vec![
                "create FRAME n1",
                "create RECTANGLE n2",
                // No placement keys reach the command itself.
                "run create-polygon n3 parent=-",
                "append n2 -> n1",
                "insert n3 -> n1 @0",
                "root n1",
                "commit Batch of 3 entities",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_path_external_parent_uses_retry() {
        let runtime = Arc::new(RecordingRuntime::default());
        let executor = BatchExecutor::new(Arc::clone(&runtime)).with_retry(RetryPolicy {
            attempts: 3,
            delay: std::time::Duration::from_millis(10),
        });

        let outcome = executor
            .execute(vec![CommandSpec::new(
                "create-star",
                json!({"parentId": "404:1"}),
            )])
            .await
            .unwrap();

        assert_eq!(outcome.count, 1);
        assert_eq!(
            runtime.calls(),
            vec![
                "run create-star n1 parent=-",
                "root n1",
                "commit Batch of 1 entities",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_commands_without_rollback() {
        let runtime = Arc::new(RecordingRuntime::failing_on("create-star"));
        let executor = BatchExecutor::new(Arc::clone(&runtime));

        let err = executor
            .execute(vec![
                CommandSpec::new("create-frame", json!({})),
                CommandSpec::new("create-star", json!({})),
                CommandSpec::new("create-rect", json!({})),
            ])
            .await
            .unwrap_err();

        match &err {
            BatchError::CommandFailed {
                index, command, ..
            } => {
                assert_eq!(*index, 1);
                assert_eq!(command, "create-star");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
        assert_eq!(err.created(), &[EntityRef::new("n1", "node n1")]);
        assert_eq!(err.to_string(), "Batch command #1 (create-star) failed: create-star exploded");

        // The created frame is still attached; the third command never ran
        // and nothing was committed.
        assert_eq!(runtime.calls(), vec!["create FRAME n1", "root n1"]);
    }

    #[tokio::test]
    async fn test_missing_identity_is_reported() {
        struct NoIdRuntime(RecordingRuntime);

        #[async_trait]
        impl DocumentRuntime for NoIdRuntime {
            type Node = String;
            async fn create_primitive(
                &self,
                kind: PrimitiveKind,
                args: &Map<String, Value>,
            ) -> Result<String, RuntimeError> {
                self.0.create_primitive(kind, args).await
            }
            async fn run_command(
                &self,
                _command: &str,
                _args: &Map<String, Value>,
            ) -> Result<Value, RuntimeError> {
                Ok(json!({"ok": true}))
            }
            async fn lookup(&self, id: &str) -> Option<String> {
                self.0.lookup(id).await
            }
            fn identity(&self, node: &String) -> EntityRef {
                self.0.identity(node)
            }
            async fn append_child(&self, p: &String, c: &String) -> Result<(), RuntimeError> {
                self.0.append_child(p, c).await
            }
            async fn insert_child(
                &self,
                p: &String,
                c: &String,
                i: usize,
            ) -> Result<(), RuntimeError> {
                self.0.insert_child(p, c, i).await
            }
            async fn attach_to_default(&self, c: &String) -> Result<(), RuntimeError> {
                self.0.attach_to_default(c).await
            }
            async fn apply_layout(&self, n: &String, l: &LayoutConfig) -> Result<(), RuntimeError> {
                self.0.apply_layout(n, l).await
            }
            async fn commit(&self, label: &str) -> Result<(), RuntimeError> {
                self.0.commit(label).await
            }
        }

        let executor = BatchExecutor::new(Arc::new(NoIdRuntime(RecordingRuntime::default())));
        let err = executor
            .execute(vec![CommandSpec::new("set-fill", json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::MissingIdentity { index: 0, .. }));
    }

    #[test]
    fn test_identity_from_result() {
        assert_eq!(
            identity_from_result(&json!({"id": "1:2", "name": "Star"})),
            Some(EntityRef::new("1:2", "Star"))
        );
        assert_eq!(
            identity_from_result(&json!({"id": "1:2"})),
            Some(EntityRef::new("1:2", ""))
        );
        assert_eq!(identity_from_result(&json!({"name": "x"})), None);
        assert_eq!(identity_from_result(&json!("1:2")), None);
    }
}

//! Bounded-retry attachment to parents that may not be visible yet.

use std::time::Duration;

use crate::batch::{DocumentRuntime, RuntimeError};

/// Number of parent lookups before giving up.
const DEFAULT_ATTEMPTS: u32 = 10;

/// Pause between parent lookups.
const DEFAULT_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

/// How an external attachment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Attached under the requested parent after `attempts` lookups.
    Attached { attempts: u32 },
    /// Parent never became visible; attached to the default container instead.
    Degraded,
}

/// Attach `child` under `parent_id`, retrying the parent lookup.
///
/// Newly created entities can exist in the document before they are visible
/// to lookups on this side, so a miss is retried up to `policy.attempts`
/// times with `policy.delay` between tries. On exhaustion the child goes to
/// the default container and the call still succeeds.
///
/// # Errors
///
/// Only errors from the runtime's attach operations are returned.
pub async fn attach_with_retry<R>(
    runtime: &R,
    child: &R::Node,
    parent_id: &str,
    insert_index: Option<usize>,
    policy: &RetryPolicy,
) -> Result<AttachOutcome, RuntimeError>
where
    R: DocumentRuntime + ?Sized,
{
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        if let Some(parent) = runtime.lookup(parent_id).await {
            match insert_index {
                Some(index) => runtime.insert_child(&parent, child, index).await?,
                None => runtime.append_child(&parent, child).await?,
            }
            if attempt > 1 {
                tracing::debug!(parent_id, attempt, "Parent became visible after retry");
            }
            return Ok(AttachOutcome::Attached { attempts: attempt });
        }

        if attempt < attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    tracing::warn!(
        parent_id,
        attempts,
        child = %runtime.identity(child).id,
        "Parent not found, attaching to default container"
    );
    runtime.attach_to_default(child).await?;
    Ok(AttachOutcome::Degraded)
}

//! Timeout budgets for bridged commands.

use std::collections::HashSet;
use std::time::Duration;

/// Default budget for ordinary commands.
pub const LIGHT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default budget for commands known to run long.
pub const HEAVY_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Commands that get the heavy budget by default: exports, whole-document
/// scripting, screenshots, and batches.
pub const HEAVY_COMMANDS: &[&str] = &[
    "export-node",
    "export-nodes",
    "export-document",
    "execute-script",
    "capture-screenshot",
    crate::models::BATCH_COMMAND,
];

/// Static classification of a command's expected duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Light,
    Heavy,
}

/// Picks the timeout budget for a command.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    light: Duration,
    heavy: Duration,
    heavy_commands: HashSet<String>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            light: LIGHT_TIMEOUT,
            heavy: HEAVY_TIMEOUT,
            heavy_commands: HEAVY_COMMANDS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl TimeoutPolicy {
    /// Replace the two default budgets, keeping the heavy-command set.
    pub fn with_budgets(light: Duration, heavy: Duration) -> Self {
        Self {
            light,
            heavy,
            ..Self::default()
        }
    }

    pub fn light(&self) -> Duration {
        self.light
    }

    pub fn heavy(&self) -> Duration {
        self.heavy
    }

    pub fn classify(&self, command: &str) -> TimeoutClass {
        if self.heavy_commands.contains(command) {
            TimeoutClass::Heavy
        } else {
            TimeoutClass::Light
        }
    }

    /// Budget for `command`. An explicit override always wins.
    pub fn budget_for(&self, command: &str, timeout_override: Option<Duration>) -> Duration {
        if let Some(budget) = timeout_override {
            return budget;
        }
        match self.classify(command) {
            TimeoutClass::Light => self.light,
            TimeoutClass::Heavy => self.heavy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let policy = TimeoutPolicy::default();
        assert_eq!(
            policy.budget_for("export-node", None),
            Duration::from_millis(120_000)
        );
        assert_eq!(
            policy.budget_for("move-node", None),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn test_override_wins_for_both_classes() {
        let policy = TimeoutPolicy::default();
        let custom = Duration::from_millis(1_500);
        assert_eq!(policy.budget_for("export-node", Some(custom)), custom);
        assert_eq!(policy.budget_for("move-node", Some(custom)), custom);
    }

    #[test]
    fn test_batches_are_heavy() {
        let policy = TimeoutPolicy::default();
        assert_eq!(
            policy.classify(crate::models::BATCH_COMMAND),
            TimeoutClass::Heavy
        );
        assert_eq!(policy.classify("create-rect"), TimeoutClass::Light);
    }

    #[test]
    fn test_with_budgets_keeps_heavy_set() {
        let policy =
            TimeoutPolicy::with_budgets(Duration::from_millis(5), Duration::from_millis(50));
        assert_eq!(policy.budget_for("capture-screenshot", None), Duration::from_millis(50));
        assert_eq!(policy.budget_for("get-node", None), Duration::from_millis(5));
    }
}

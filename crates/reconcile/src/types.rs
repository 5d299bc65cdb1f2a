//! Core types for reconciliation runs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Output;

/// Conventional state values shared by adapters.
///
/// Existence-style resources use `present`/`absent`; process-style resources
/// use `running`/`stopped`/`restarted`.
pub mod state {
    pub const PRESENT: &str = "present";
    pub const ABSENT: &str = "absent";
    pub const RUNNING: &str = "running";
    pub const STOPPED: &str = "stopped";
    pub const RESTARTED: &str = "restarted";

    /// State assumed when a declaration omits one
    pub fn default_state() -> String {
        PRESENT.to_string()
    }
}

/// Result of applying a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Whether the resource changed (or, in a dry run, would change)
    pub changed: bool,
    /// Human-readable summary of what happened
    pub message: String,
}

impl ApplyResult {
    /// The resource was already converged
    pub fn unchanged(message: impl Into<String>) -> Self {
        Self {
            changed: false,
            message: message.into(),
        }
    }

    /// The resource was mutated
    pub fn changed(message: impl Into<String>) -> Self {
        Self {
            changed: true,
            message: message.into(),
        }
    }

    /// Dry-run report for a resource that is out of desired state
    pub fn would(what: impl fmt::Display) -> Self {
        Self {
            changed: true,
            message: format!("would {what}"),
        }
    }
}

/// What a mutating apply actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Modified,
    Removed,
    Installed,
    Uninstalled,
    Started,
    Stopped,
    Restarted,
    Executed,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Created => "created",
            Action::Modified => "modified",
            Action::Removed => "removed",
            Action::Installed => "installed",
            Action::Uninstalled => "uninstalled",
            Action::Started => "started",
            Action::Stopped => "stopped",
            Action::Restarted => "restarted",
            Action::Executed => "executed",
        };
        f.write_str(s)
    }
}

/// Private record a resource keeps about its last mutating apply
///
/// Enough to attempt a revert in-process, and to replay one later from the
/// transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub action: Action,
    /// Path, package name or unit the action touched
    pub target: String,
    /// Copy of the pre-change file, if one existed
    pub backup_path: Option<PathBuf>,
    /// Adapter-specific description of the prior state
    pub prev_state: Option<String>,
}

impl Change {
    pub fn new(action: Action, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            backup_path: None,
            prev_state: None,
        }
    }

    pub fn with_backup(mut self, backup_path: Option<PathBuf>) -> Self {
        self.backup_path = backup_path;
        self
    }

    pub fn with_prev_state(mut self, prev_state: impl Into<String>) -> Self {
        self.prev_state = Some(prev_state.into());
        self
    }
}

/// Status reported to the state-persistence hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    Success,
    Failed,
    Reverted,
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateStatus::Success => f.write_str("success"),
            StateStatus::Failed => f.write_str("failed"),
            StateStatus::Reverted => f.write_str("reverted"),
        }
    }
}

/// Per-item status in a run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Resource was mutated (or would be, in a dry run)
    Changed,
    /// Already in desired state
    NoChange,
    /// Check or apply failed
    Failed { error: String },
}

impl ItemStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Typed outcome of one resource in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub id: String,
    pub resource_type: String,
    pub status: ItemStatus,
    pub message: String,
}

/// Summary of execution results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub changed: usize,
    pub no_change: usize,
    pub failed: usize,
    /// Resources never started because an earlier layer failed
    pub skipped: usize,
    pub reverted: usize,
    pub revert_failed: usize,
    /// Every item outcome, in completion order
    pub outcomes: Vec<ItemOutcome>,
}

impl RunSummary {
    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.changed + self.no_change + self.failed
    }

    /// Add an item outcome to the summary
    pub fn add_outcome(&mut self, outcome: ItemOutcome) {
        match outcome.status {
            ItemStatus::Changed => self.changed += 1,
            ItemStatus::NoChange => self.no_change += 1,
            ItemStatus::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Outcomes that failed
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failure())
    }
}

/// How the engine walks the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Layer by layer, members of a layer in parallel, rollback on failure
    #[default]
    Layered,
    /// One flat ordered list, continue past failures, no rollback
    Sequential,
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't make changes, just report what would happen
    pub dry_run: bool,
    /// Worker threads per layer (0 = one per layer member)
    pub jobs: usize,
    pub mode: ExecutionMode,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 0,
            mode: ExecutionMode::Layered,
        }
    }
}

/// Output from a command run on the target
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

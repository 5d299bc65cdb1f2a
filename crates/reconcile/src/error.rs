//! Error types for reconciliation runs.
//!
//! Errors are categorized so callers can tell a rejected definition (nothing
//! was touched) apart from a failed run (something may have been changed and
//! rolled back). Each variant carries the resource ids involved.

use crate::rollback::RollbackReport;
use std::path::PathBuf;
use thiserror::Error;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid parameters, unknown dependency or dependency cycle
    Definition,
    /// A resource could not determine its drift
    Check,
    /// A mutation attempt failed
    Apply,
    /// A best-effort undo failed
    Revert,
    /// State hook or history store failed
    Persistence,
    /// A run-level outcome (failed layer, aggregated failures, history lookups)
    Run,
}

impl ErrorKind {
    /// Whether errors of this kind are guaranteed to happen before any mutation.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(self, Self::Definition)
    }

    /// Get a user-friendly description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Definition => "Invalid resource definition",
            Self::Check => "Drift check failed",
            Self::Apply => "Apply failed",
            Self::Revert => "Revert failed",
            Self::Persistence => "Could not persist state",
            Self::Run => "Run failed",
        }
    }
}

/// Errors that can occur while planning, applying or rolling back resources.
#[derive(Debug, Error)]
pub enum Error {
    /// Two resources share the same id
    #[error("duplicate resource id: {id}")]
    DuplicateId {
        /// The id declared more than once
        id: String,
    },

    /// A dependency does not resolve to any declared resource
    #[error("resource {resource} depends on unknown resource {missing}")]
    UnknownDependency {
        /// Resource declaring the dependency
        resource: String,
        /// The id that could not be resolved
        missing: String,
    },

    /// The dependency graph contains a cycle
    #[error("dependency cycle detected among: {}", .ids.join(", "))]
    Cycle {
        /// Resources that could not be scheduled
        ids: Vec<String>,
    },

    /// The adapter rejected its parameters
    #[error("invalid parameters for {resource}: {message}")]
    InvalidParams {
        /// Resource id
        resource: String,
        /// What was wrong
        message: String,
    },

    /// The resource factory could not build an instance
    #[error("cannot create {resource_type} resource {resource}: {source}")]
    Factory {
        /// Resource id
        resource: String,
        /// Declared resource type
        resource_type: String,
        /// Underlying factory error
        source: anyhow::Error,
    },

    /// Drift detection failed
    #[error("check failed for {resource}: {source}")]
    Check {
        /// Resource id
        resource: String,
        /// Underlying adapter error
        source: anyhow::Error,
    },

    /// A mutation failed
    #[error("apply failed for {resource}: {source}")]
    Apply {
        /// Resource id
        resource: String,
        /// Underlying adapter error
        source: anyhow::Error,
    },

    /// An undo failed
    #[error("revert failed for {resource}: {source}")]
    Revert {
        /// Resource id
        resource: String,
        /// Underlying adapter error
        source: anyhow::Error,
    },

    /// A layer had at least one failing member; rollback has already run
    #[error("layer {layer} failed: {}{}", summarize(.errors), rollback_note(.rollback))]
    LayerFailed {
        /// Zero-based layer index
        layer: usize,
        /// Every member error, in completion order
        errors: Vec<Error>,
        /// What the rollback sweep achieved
        rollback: RollbackReport,
    },

    /// Sequential run finished with failures
    #[error("{failed} of {total} resources failed: {}", summarize(.errors))]
    Aggregate {
        /// Number of failed resources
        failed: usize,
        /// Number of processed resources
        total: usize,
        /// Every item error, in execution order
        errors: Vec<Error>,
    },

    /// No transaction with this id in the history store
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// The transaction was already rolled back (or is itself a rollback)
    #[error("transaction {0} has already been rolled back")]
    AlreadyRolledBack(String),

    /// The history store could not be read or written
    #[error("history store {}: {message}", .path.display())]
    History {
        /// Location of the store
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateId { .. }
            | Error::UnknownDependency { .. }
            | Error::Cycle { .. }
            | Error::InvalidParams { .. }
            | Error::Factory { .. } => ErrorKind::Definition,
            Error::Check { .. } => ErrorKind::Check,
            Error::Apply { .. } => ErrorKind::Apply,
            Error::Revert { .. } => ErrorKind::Revert,
            Error::History { .. } | Error::Io(_) | Error::Json(_) => ErrorKind::Persistence,
            Error::LayerFailed { .. }
            | Error::Aggregate { .. }
            | Error::TransactionNotFound(_)
            | Error::AlreadyRolledBack(_) => ErrorKind::Run,
        }
    }

    /// Whether this error rejected the run before anything was changed.
    pub fn is_definition(&self) -> bool {
        self.kind() == ErrorKind::Definition
    }

    /// Resource id this error is about, if it concerns a single resource.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::DuplicateId { id } => Some(id),
            Error::UnknownDependency { resource, .. }
            | Error::InvalidParams { resource, .. }
            | Error::Factory { resource, .. }
            | Error::Check { resource, .. }
            | Error::Apply { resource, .. }
            | Error::Revert { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

fn summarize(errors: &[Error]) -> String {
    match errors {
        [] => "no errors recorded".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

fn rollback_note(report: &RollbackReport) -> String {
    if report.is_complete() {
        String::new()
    } else {
        format!(
            "; rollback incomplete ({} revert(s) failed)",
            report.failed.len()
        )
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

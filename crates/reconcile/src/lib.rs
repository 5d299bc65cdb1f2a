//! # Reconcile
//!
//! The engine behind an agentless configuration-management tool.
//!
//! A run takes a list of declared resources, sorts them into dependency
//! layers, and converges the target one layer at a time. Members of a layer
//! run in parallel; if any of them fails, everything applied so far in the
//! run is reverted. Every run that touched the target leaves a durable
//! [`Transaction`] that can be rolled back later by id.
//!
//! ## Core Concepts
//!
//! - **Resource**: One managed thing with `validate`, `check`, `apply` and
//!   optionally `revert`
//! - **ExecutionPlan**: Dependency layers built from [`ConfigItem`]s
//! - **Engine**: Applies a plan layered or sequentially, with two-phase
//!   rollback on layer failure
//! - **TransactionManager**: Lists recorded runs and undoes them from the
//!   recorded changes alone
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{Engine, ExecuteOptions, ExecutionPlan, LocalTransport, System, execute};
//! use std::sync::Arc;
//!
//! let system = System::new(Arc::new(LocalTransport));
//! let plan = ExecutionPlan::build(items, &factory, &system)?;
//! let engine = Engine::new(&system, ExecuteOptions::default()).with_hook(&state);
//! let report = execute(plan, engine, Some(&store));
//! ```
//!
//! ## Seams
//!
//! The engine knows nothing about concrete adapters or where state lives:
//!
//! - [`Transport`]: Runs commands and moves files on the target
//! - [`PackageBackend`]: Installs and removes packages
//! - [`StateHook`]: Persists per-resource status
//! - [`ProgressCallback`]: Receives progress as items complete

pub mod backup;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod resource;
pub mod rollback;
pub mod transaction;
pub mod transport;
pub mod types;

// Re-export main types at crate root
pub use backup::BackupManager;
pub use context::{
    ApplyContext, CancelToken, NoProgress, NoState, PackageBackend, ProgressCallback, StateHook,
    System,
};
pub use diff::{DiffSummary, Drift, ResourceDiff, compute_diffs, group_by_type};
pub use error::{Error, ErrorKind, Result};
pub use executor::{Engine, RunReport, execute};
pub use graph::{DependencyNode, sort_layers, validate_graph};
pub use planner::{ExecutionPlan, Layer};
pub use resource::{BoxedResource, ConfigItem, Params, PlannedResource, Resource, ResourceFactory};
pub use rollback::RollbackReport;
pub use transaction::{
    Transaction, TransactionChange, TransactionManager, TransactionStatus, TransactionStore,
    new_transaction_id,
};
pub use transport::{LocalTransport, Transport};
pub use types::{
    Action, ApplyResult, Change, CommandOutput, ExecuteOptions, ExecutionMode, ItemOutcome,
    ItemStatus, RunSummary, StateStatus, state,
};

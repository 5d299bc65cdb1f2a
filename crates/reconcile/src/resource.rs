//! Resource trait for state convergence
//!
//! A Resource represents something on the target that can be in a certain
//! state, can be changed to reach a desired state, and can (sometimes) be
//! changed back.

use crate::context::{ApplyContext, System};
use crate::graph::DependencyNode;
use crate::types::{ApplyResult, Change, state};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-form adapter parameters
pub type Params = serde_json::Map<String, serde_json::Value>;

/// One declared resource, as submitted to the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigItem {
    /// Unique id within the run, used for dependency edges
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default = "state::default_state")]
    pub state: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ConfigItem {
    pub fn new(id: &str, resource_type: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            state: state::default_state(),
            params: Params::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.depends_on.push(id.to_string());
        self
    }
}

impl DependencyNode for ConfigItem {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

/// Core trait for declarative resources
///
/// Every adapter implements this contract:
/// - `validate` checks parameters without touching the target
/// - `check` reports drift without mutating anything
/// - `apply` converges, re-deriving drift itself since earlier resources in
///   the same run may have changed shared state since `check`
/// - `revert` undoes the last successful apply, best effort
///
/// # Example
///
/// ```ignore
/// use reconcile::{ApplyContext, ApplyResult, Change, Action, Resource};
///
/// #[derive(Debug)]
/// struct Marker { path: std::path::PathBuf, created: bool }
///
/// impl Resource for Marker {
///     fn id(&self) -> String { self.path.display().to_string() }
///     fn description(&self) -> String { format!("Marker {}", self.path.display()) }
///     fn resource_type(&self) -> &'static str { "marker" }
///     fn desired_state(&self) -> String { "present".into() }
///
///     fn check(&self, ctx: &ApplyContext) -> anyhow::Result<bool> {
///         Ok(!ctx.transport().exists(&self.path)?)
///     }
///
///     fn apply(&mut self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
///         if !self.check(ctx)? {
///             return Ok(ApplyResult::unchanged("exists"));
///         }
///         if ctx.dry_run {
///             return Ok(ApplyResult::would(format!("create {}", self.path.display())));
///         }
///         ctx.transport().write_file(&self.path, b"")?;
///         self.created = true;
///         Ok(ApplyResult::changed("created"))
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Resource name (package name, path, unit, ...)
    fn id(&self) -> String;

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    /// Resource type category (e.g. "file", "package", "service")
    fn resource_type(&self) -> &'static str;

    /// Desired state value ("present", "absent", "running", ...)
    fn desired_state(&self) -> String;

    /// Static parameter sanity check; no I/O against the target
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Compare live state to desired state. `true` means drift.
    fn check(&self, ctx: &ApplyContext) -> Result<bool>;

    /// Converge to the desired state
    ///
    /// This method should:
    /// 1. Re-check drift (return `ApplyResult::unchanged` if none)
    /// 2. Respect `ctx.dry_run` (return `ApplyResult::would` without mutating)
    /// 3. Make the change and remember what it did for `revert`
    fn apply(&mut self, ctx: &ApplyContext) -> Result<ApplyResult>;

    /// Whether `revert` can undo anything
    ///
    /// Resources without a meaningful inverse keep the default and are
    /// skipped by rollback.
    fn can_revert(&self) -> bool {
        false
    }

    /// Best-effort inverse of the last successful apply
    fn revert(&mut self, _ctx: &ApplyContext) -> Result<()> {
        Ok(())
    }

    /// What the last mutating apply did, for the transaction record
    fn last_change(&self) -> Option<Change> {
        None
    }
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// Builds resources from declarations: `(type, name, params, system)`
///
/// The engine only ever sees this function value, never the adapter registry.
pub type ResourceFactory =
    dyn Fn(&str, &str, &Params, &System) -> Result<BoxedResource> + Send + Sync;

/// A resource instance bound to its declaration
#[derive(Debug)]
pub struct PlannedResource {
    /// Declaration id (unique per run)
    pub id: String,
    /// Desired state as declared
    pub state: String,
    pub resource: BoxedResource,
}

impl PlannedResource {
    pub fn new(id: impl Into<String>, state: impl Into<String>, resource: BoxedResource) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
            resource,
        }
    }

    pub fn resource_type(&self) -> &'static str {
        self.resource.resource_type()
    }
}

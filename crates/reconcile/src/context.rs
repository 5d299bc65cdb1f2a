//! Apply context and provider traits
//!
//! These traits keep the engine independent of the concrete transport,
//! package manager, state store and UI. Everything is injected by the caller.

use crate::backup::BackupManager;
use crate::transport::Transport;
use crate::types::{ItemOutcome, StateStatus};
use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Package manager capability set, selected once per target
pub trait PackageBackend: Send + Sync {
    /// Backend name (e.g. "apt", "brew")
    fn name(&self) -> &str;

    fn is_installed(&self, transport: &dyn Transport, package: &str) -> Result<bool>;

    fn install(&self, transport: &dyn Transport, package: &str) -> Result<()>;

    fn remove(&self, transport: &dyn Transport, package: &str) -> Result<()>;
}

/// Everything adapters may use to reach the target
///
/// Built once per run (per host) and shared by every resource.
#[derive(Clone)]
pub struct System {
    pub transport: Arc<dyn Transport>,
    /// Snapshot collaborator, absent when backups are disabled
    pub backups: Option<Arc<BackupManager>>,
    /// Detected package manager, if any
    pub packages: Option<Arc<dyn PackageBackend>>,
    /// Detected system facts (os, family, arch, ...)
    pub facts: BTreeMap<String, String>,
}

impl System {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            backups: None,
            packages: None,
            facts: BTreeMap::new(),
        }
    }

    pub fn with_backups(mut self, backups: Arc<BackupManager>) -> Self {
        self.backups = Some(backups);
        self
    }

    pub fn with_packages(mut self, packages: Arc<dyn PackageBackend>) -> Self {
        self.packages = Some(packages);
        self
    }

    pub fn with_fact(mut self, key: &str, value: impl Into<String>) -> Self {
        self.facts.insert(key.to_string(), value.into());
        self
    }

    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    /// Get the package backend, or error if none was detected
    pub fn require_packages(&self) -> Result<&dyn PackageBackend> {
        match &self.packages {
            Some(p) => Ok(p.as_ref()),
            None => bail!("No supported package manager detected on {}", self.transport.name()),
        }
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("transport", &self.transport.name())
            .field("backups", &self.backups)
            .field("packages", &self.packages.as_ref().map(|p| p.name().to_string()))
            .field("facts", &self.facts)
            .finish()
    }
}

/// Caller-supplied cancellation, shared by every task of a run
///
/// The engine never cancels on its own; long-running adapters poll it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out if the run was cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            bail!("Operation cancelled");
        }
        Ok(())
    }
}

/// Receives `UpdateResource(type, name, desired_state, status)` calls
///
/// Failures are logged by the engine and never abort a run.
pub trait StateHook: Send + Sync {
    fn update_resource(
        &self,
        resource_type: &str,
        name: &str,
        desired_state: &str,
        status: StateStatus,
    ) -> Result<()>;
}

impl<F> StateHook for F
where
    F: Fn(&str, &str, &str, StateStatus) -> Result<()> + Send + Sync,
{
    fn update_resource(
        &self,
        resource_type: &str,
        name: &str,
        desired_state: &str,
        status: StateStatus,
    ) -> Result<()> {
        self(resource_type, name, desired_state, status)
    }
}

/// Hook that persists nothing
pub struct NoState;

impl StateHook for NoState {
    fn update_resource(&self, _: &str, _: &str, _: &str, _: StateStatus) -> Result<()> {
        Ok(())
    }
}

/// Progress callback for execution operations
///
/// Called from worker threads as items complete, so implementations must be
/// thread-safe.
pub trait ProgressCallback: Send + Sync {
    /// Called before the members of a layer are dispatched
    fn on_layer_start(&self, index: usize, count: usize);

    /// Called as soon as a resource finishes (changed, no-change or failed)
    fn on_resource_complete(&self, outcome: &ItemOutcome);

    /// Called after each revert attempt during rollback
    fn on_revert(&self, id: &str, error: Option<&str>);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_layer_start(&self, _index: usize, _count: usize) {}
    fn on_resource_complete(&self, _outcome: &ItemOutcome) {}
    fn on_revert(&self, _id: &str, _error: Option<&str>) {}
}

/// Context passed to resource check/apply/revert operations
pub struct ApplyContext<'a> {
    /// Whether this is a dry run (no actual changes)
    pub dry_run: bool,
    pub system: &'a System,
    pub cancel: &'a CancelToken,
}

impl<'a> ApplyContext<'a> {
    /// Create a new apply context
    pub fn new(system: &'a System, cancel: &'a CancelToken, dry_run: bool) -> Self {
        Self {
            dry_run,
            system,
            cancel,
        }
    }

    /// Shortcut to the target transport
    pub fn transport(&self) -> &dyn Transport {
        self.system.transport.as_ref()
    }

    /// Shortcut to the backup collaborator
    pub fn backups(&self) -> Option<&BackupManager> {
        self.system.backups.as_deref()
    }
}

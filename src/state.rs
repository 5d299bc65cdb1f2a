//! Last known status of every managed resource
//!
//! Written through on each engine hook call so an interrupted run still
//! leaves an accurate picture behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reconcile::{StateHook, StateStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ============================================================================
// State Structures
// ============================================================================

/// Contents of `state.toml`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResourceStates {
    /// Records keyed by `<type>.<name>`
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,

    /// Last time the state was updated
    pub last_updated: DateTime<Utc>,
}

/// Status of one resource after its latest apply or revert
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub desired_state: String,
    pub status: StateStatus,
    pub updated_at: DateTime<Utc>,
}

impl Default for ResourceStates {
    fn default() -> Self {
        Self {
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl ResourceStates {
    /// Load state from disk, or return default if file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file does not exist, using default state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;

        let state: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    /// Save state to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content = toml::to_string_pretty(&self).context("Failed to serialize state to TOML")?;

        fs::write(path, &content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    fn key(resource_type: &str, name: &str) -> String {
        format!("{resource_type}.{name}")
    }

    /// Record a status, replacing any earlier record of the same resource
    pub fn record(
        &mut self,
        resource_type: &str,
        name: &str,
        desired_state: &str,
        status: StateStatus,
    ) {
        let now = Utc::now();
        self.resources.insert(
            Self::key(resource_type, name),
            ResourceRecord {
                resource_type: resource_type.to_string(),
                name: name.to_string(),
                desired_state: desired_state.to_string(),
                status,
                updated_at: now,
            },
        );
        self.last_updated = now;
    }

    pub fn get(&self, resource_type: &str, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(&Self::key(resource_type, name))
    }
}

// ============================================================================
// Engine hook
// ============================================================================

/// File-backed [`StateHook`]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<ResourceStates>,
}

impl StateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = ResourceStates::load(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Snapshot of the current records
    pub fn snapshot(&self) -> ResourceStates {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StateHook for StateStore {
    fn update_resource(
        &self,
        resource_type: &str,
        name: &str,
        desired_state: &str,
        status: StateStatus,
    ) -> Result<()> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.record(resource_type, name, desired_state, status);
        state.save(&self.path)
    }
}

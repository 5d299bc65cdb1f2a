//! Path resolution for converge state
//!
//! # Environment Variables
//!
//! - `CONVERGE_STATE_DIR` - Override the state directory
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `CONVERGE_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/converge` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\converge`
//!    - macOS/Linux: `~/.local/state/converge`
//!
//! The state directory holds `history.json` (transactions), `state.toml`
//! (last known status per resource) and `backups/` (one directory per run).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "CONVERGE_STATE_DIR";

const APP_DIR: &str = "converge";

/// Get the converge state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP_DIR);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join(APP_DIR);
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP_DIR);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Files under one state directory
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from the environment (see [`state_dir`])
    pub fn resolve() -> Result<Self> {
        Ok(Self::new(state_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Transaction history (JSON array)
    pub fn history_file(&self) -> PathBuf {
        self.root.join("history.json")
    }

    /// Per-resource status file
    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.toml")
    }

    /// Root of per-run backup directories
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Create the state directory if needed
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create state dir: {}", self.root.display()))
    }
}

/// Expand ~ and environment variables in a path string.
///
/// Recipe paths and the state-dir override both go through here.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

//! File resource - managed file contents

use anyhow::{Context, Result, bail};
use reconcile::{Action, ApplyContext, ApplyResult, Change, Params, Resource, state};
use std::path::PathBuf;

use super::{path_param, state_param, str_param};

/// A file whose contents are managed
#[derive(Debug, Clone)]
pub struct File {
    pub path: PathBuf,
    /// Desired contents (`None` only when the file should be absent)
    pub content: Option<String>,
    pub state: String,
    last: Option<Applied>,
}

/// What the last apply did, kept for revert
#[derive(Debug, Clone)]
struct Applied {
    change: Change,
    /// Contents before the change, when the file existed
    previous: Option<Vec<u8>>,
}

/// blake3 digest of file contents, recorded as the prior state
pub fn digest(contents: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(contents).to_hex())
}

impl File {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
            state: state::PRESENT.to_string(),
            last: None,
        }
    }

    pub fn absent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: None,
            state: state::ABSENT.to_string(),
            last: None,
        }
    }

    pub fn from_params(name: &str, params: &Params) -> Result<Self> {
        let path = path_param(name, params)?;
        let state = state_param(params, &[state::PRESENT, state::ABSENT], state::PRESENT)?;
        let content = match (str_param(params, "content")?, str_param(params, "source")?) {
            (Some(content), None) => Some(content.to_string()),
            (None, Some(source)) => {
                let source = crate::paths::expand(source);
                Some(std::fs::read_to_string(&source).with_context(|| {
                    format!("Failed to read source file: {}", source.display())
                })?)
            }
            (Some(_), Some(_)) => bail!("'content' and 'source' are mutually exclusive"),
            (None, None) => None,
        };

        Ok(Self {
            path,
            content,
            state,
            last: None,
        })
    }

    fn wants_present(&self) -> bool {
        self.state == state::PRESENT
    }
}

impl Resource for File {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        if self.wants_present() {
            format!("File {}", self.path.display())
        } else {
            format!("Remove file {}", self.path.display())
        }
    }

    fn resource_type(&self) -> &'static str {
        "file"
    }

    fn desired_state(&self) -> String {
        self.state.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.wants_present() && self.content.is_none() {
            bail!("a present file needs 'content' or 'source'");
        }
        Ok(())
    }

    fn check(&self, ctx: &ApplyContext) -> Result<bool> {
        if self.wants_present() {
            let current = ctx.transport().read_file(&self.path)?;
            let desired = self.content.as_deref().unwrap_or_default().as_bytes();
            Ok(current.as_deref() != Some(desired))
        } else {
            ctx.transport().exists(&self.path)
        }
    }

    fn apply(&mut self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let transport = ctx.transport();
        let previous = transport.read_file(&self.path)?;
        let desired = self.content.clone().unwrap_or_default();

        let action = match (&previous, self.wants_present()) {
            (Some(current), true) if current.as_slice() == desired.as_bytes() => {
                return Ok(ApplyResult::unchanged("content up to date"));
            }
            (None, false) => return Ok(ApplyResult::unchanged("already absent")),
            (None, true) => Action::Created,
            (Some(_), true) => Action::Modified,
            (Some(_), false) => Action::Removed,
        };

        if ctx.dry_run {
            let verb = match action {
                Action::Created => "create",
                Action::Removed => "remove",
                _ => "update",
            };
            return Ok(ApplyResult::would(format!("{} {}", verb, self.path.display())));
        }

        let backup = match (ctx.backups(), previous.is_some()) {
            (Some(backups), true) => backups.backup(transport, &self.path)?,
            _ => None,
        };

        if self.wants_present() {
            transport
                .write_file(&self.path, desired.as_bytes())
                .with_context(|| format!("Failed to write {}", self.path.display()))?;
        } else {
            transport.remove_path(&self.path)?;
        }

        let mut change = Change::new(action, self.id()).with_backup(backup);
        if let Some(prev) = &previous {
            change = change.with_prev_state(digest(prev));
        }
        self.last = Some(Applied { change, previous });

        Ok(ApplyResult::changed(format!("{} {}", action, self.path.display())))
    }

    fn can_revert(&self) -> bool {
        true
    }

    fn revert(&mut self, ctx: &ApplyContext) -> Result<()> {
        let Some(applied) = self.last.take() else {
            return Ok(());
        };
        let transport = ctx.transport();

        match (&applied.change.backup_path, &applied.previous) {
            (Some(backup), _) => reconcile::BackupManager::restore(transport, backup, &self.path)?,
            (None, Some(previous)) => transport.write_file(&self.path, previous)?,
            (None, None) => {
                if transport.exists(&self.path)? {
                    transport.remove_path(&self.path)?;
                }
            }
        }

        log::debug!("Reverted {} ({})", self.path.display(), applied.change.action);
        Ok(())
    }

    fn last_change(&self) -> Option<Change> {
        self.last.as_ref().map(|a| a.change.clone())
    }
}

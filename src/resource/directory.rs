//! Directory resource

use anyhow::{Result, bail};
use reconcile::{Action, ApplyContext, ApplyResult, Change, Params, Resource, state};
use std::path::PathBuf;

use super::{path_param, state_param};

/// A directory that should exist (or not)
#[derive(Debug, Clone)]
pub struct Directory {
    pub path: PathBuf,
    pub state: String,
    last: Option<Action>,
}

impl Directory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: state::PRESENT.to_string(),
            last: None,
        }
    }

    pub fn from_params(name: &str, params: &Params) -> Result<Self> {
        Ok(Self {
            path: path_param(name, params)?,
            state: state_param(params, &[state::PRESENT, state::ABSENT], state::PRESENT)?,
            last: None,
        })
    }

    fn wants_present(&self) -> bool {
        self.state == state::PRESENT
    }
}

impl Resource for Directory {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!("Directory {}", self.path.display())
    }

    fn resource_type(&self) -> &'static str {
        "directory"
    }

    fn desired_state(&self) -> String {
        self.state.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.path.parent().is_none() {
            bail!("refusing to manage the filesystem root");
        }
        Ok(())
    }

    fn check(&self, ctx: &ApplyContext) -> Result<bool> {
        let exists = ctx.transport().exists(&self.path)?;
        Ok(exists != self.wants_present())
    }

    fn apply(&mut self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if !self.check(ctx)? {
            return Ok(ApplyResult::unchanged(format!("already {}", self.state)));
        }

        let action = if self.wants_present() {
            Action::Created
        } else {
            Action::Removed
        };

        if ctx.dry_run {
            let verb = if action == Action::Created { "create" } else { "remove" };
            return Ok(ApplyResult::would(format!("{} {}", verb, self.path.display())));
        }

        // Only empty directories are removed
        match action {
            Action::Created => ctx.transport().create_dir_all(&self.path)?,
            _ => ctx.transport().remove_path(&self.path)?,
        }
        self.last = Some(action);

        Ok(ApplyResult::changed(format!("{} {}", action, self.path.display())))
    }

    fn can_revert(&self) -> bool {
        true
    }

    fn revert(&mut self, ctx: &ApplyContext) -> Result<()> {
        match self.last.take() {
            Some(Action::Created) => ctx.transport().remove_path(&self.path),
            Some(_) => ctx.transport().create_dir_all(&self.path),
            None => Ok(()),
        }
    }

    fn last_change(&self) -> Option<Change> {
        self.last.map(|action| Change::new(action, self.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{CancelToken, LocalTransport, System};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_revert() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("srv").join("www");
        let system = System::new(Arc::new(LocalTransport));
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&system, &cancel, false);

        let mut resource = Directory::new(&path);
        assert!(resource.apply(&ctx).unwrap().changed);
        assert!(path.is_dir());
        assert!(!resource.apply(&ctx).unwrap().changed);

        resource.revert(&ctx).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_dry_run_leaves_filesystem_alone() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("cache");
        let existing = dir.path().join("old");
        std::fs::create_dir(&existing).unwrap();

        let system = System::new(Arc::new(LocalTransport));
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&system, &cancel, true);

        let mut create = Directory::new(&missing);
        let result = create.apply(&ctx).unwrap();
        assert!(result.changed);
        assert!(result.message.starts_with("would create"));
        assert!(!missing.exists());
        assert!(create.last_change().is_none());

        let mut remove = Directory::new(&existing);
        remove.state = state::ABSENT.to_string();
        let result = remove.apply(&ctx).unwrap();
        assert!(result.message.starts_with("would remove"));
        assert!(existing.is_dir());
    }

    #[test]
    fn test_root_is_invalid() {
        assert!(Directory::new("/").validate().is_err());
    }
}

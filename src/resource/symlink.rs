//! Symlink resource
//!
//! Links are inspected and created with `readlink` and `ln -sfn` on the
//! target, so the adapter works over any transport.

use anyhow::{Result, bail};
use reconcile::{Action, ApplyContext, ApplyResult, Change, Params, Resource, state};
use std::path::{Path, PathBuf};

use super::{path_param, required_str, state_param, str_param};

/// A symlink at `path` pointing to `source`
#[derive(Debug, Clone)]
pub struct Symlink {
    /// What the symlink points to
    pub source: PathBuf,
    /// Where the symlink is created
    pub path: PathBuf,
    pub state: String,
    last: Option<Change>,
}

#[derive(Debug, PartialEq, Eq)]
enum SymlinkState {
    Missing,
    Correct,
    WrongTarget(String),
    FileExists,
}

impl Symlink {
    pub fn new(source: impl AsRef<Path>, path: impl AsRef<Path>) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            path: path.as_ref().to_path_buf(),
            state: state::PRESENT.to_string(),
            last: None,
        }
    }

    pub fn from_params(name: &str, params: &Params) -> Result<Self> {
        let state = state_param(params, &[state::PRESENT, state::ABSENT], state::PRESENT)?;
        let source = if state == state::PRESENT {
            required_str(params, "source")?
        } else {
            str_param(params, "source")?.unwrap_or_default()
        };
        Ok(Self {
            source: crate::paths::expand(source),
            path: path_param(name, params)?,
            state,
            last: None,
        })
    }

    fn wants_present(&self) -> bool {
        self.state == state::PRESENT
    }

    fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn check_current(&self, ctx: &ApplyContext) -> Result<SymlinkState> {
        let transport = ctx.transport();
        if !transport.exists(&self.path)? {
            return Ok(SymlinkState::Missing);
        }

        let output = transport.run("readlink", &[&self.path_str()])?;
        if !output.success {
            return Ok(SymlinkState::FileExists);
        }

        let current = output.stdout_str().trim().to_string();
        if Path::new(&current) == self.source {
            Ok(SymlinkState::Correct)
        } else {
            Ok(SymlinkState::WrongTarget(current))
        }
    }

    fn link(ctx: &ApplyContext, source: &str, path: &str) -> Result<()> {
        let output = ctx.transport().run("ln", &["-sfn", source, path])?;
        if !output.success {
            bail!(
                "Failed to create symlink {} -> {}: {}",
                path,
                source,
                output.stderr_str().trim()
            );
        }
        Ok(())
    }
}

impl Resource for Symlink {
    fn id(&self) -> String {
        self.path_str()
    }

    fn description(&self) -> String {
        format!("Symlink {} -> {}", self.path.display(), self.source.display())
    }

    fn resource_type(&self) -> &'static str {
        "symlink"
    }

    fn desired_state(&self) -> String {
        self.state.clone()
    }

    fn check(&self, ctx: &ApplyContext) -> Result<bool> {
        let current = self.check_current(ctx)?;
        Ok(match (current, self.wants_present()) {
            (SymlinkState::Correct, true) | (SymlinkState::Missing, false) => false,
            // A regular file is never ours to delete
            (SymlinkState::FileExists, false) => false,
            _ => true,
        })
    }

    fn apply(&mut self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let current = self.check_current(ctx)?;
        let source = self.source.to_string_lossy().to_string();
        let path = self.path_str();

        let change = match (current, self.wants_present()) {
            (SymlinkState::Correct, true) => {
                return Ok(ApplyResult::unchanged(format!("-> {source}")));
            }
            (SymlinkState::Missing, false) | (SymlinkState::FileExists, false) => {
                return Ok(ApplyResult::unchanged("no symlink present"));
            }
            (SymlinkState::FileExists, true) => {
                // Don't overwrite existing files automatically
                bail!("A non-symlink file exists at {}", path);
            }
            (SymlinkState::Missing, true) => Change::new(Action::Created, path.clone()),
            (SymlinkState::WrongTarget(prev), true) => {
                Change::new(Action::Modified, path.clone()).with_prev_state(prev)
            }
            (SymlinkState::Correct, false) => {
                Change::new(Action::Removed, path.clone()).with_prev_state(source.clone())
            }
            (SymlinkState::WrongTarget(prev), false) => {
                Change::new(Action::Removed, path.clone()).with_prev_state(prev)
            }
        };

        if ctx.dry_run {
            let verb = match change.action {
                Action::Created => "create",
                Action::Removed => "remove",
                _ => "retarget",
            };
            return Ok(ApplyResult::would(format!("{verb} symlink {path}")));
        }

        if self.wants_present() {
            if let Some(parent) = self.path.parent() {
                ctx.transport().create_dir_all(parent)?;
            }
            Self::link(ctx, &source, &path)?;
        } else {
            ctx.transport().remove_path(&self.path)?;
        }

        let message = format!("{} {}", change.action, path);
        self.last = Some(change);
        Ok(ApplyResult::changed(message))
    }

    fn can_revert(&self) -> bool {
        true
    }

    fn revert(&mut self, ctx: &ApplyContext) -> Result<()> {
        let Some(change) = self.last.take() else {
            return Ok(());
        };
        let path = self.path_str();
        match (change.action, change.prev_state) {
            (Action::Created, _) => ctx.transport().remove_path(&self.path),
            (_, Some(previous)) => Self::link(ctx, &previous, &path),
            (action, None) => bail!("No previous target recorded for {} {}", action, path),
        }
    }

    fn last_change(&self) -> Option<Change> {
        self.last.clone()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use reconcile::{CancelToken, LocalTransport, System};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_create_retarget_and_revert() {
        let dir = TempDir::new().unwrap();
        let old_src = dir.path().join("v1");
        let new_src = dir.path().join("v2");
        fs::create_dir(&old_src).unwrap();
        fs::create_dir(&new_src).unwrap();
        let link = dir.path().join("current");
        std::os::unix::fs::symlink(&old_src, &link).unwrap();

        let system = System::new(Arc::new(LocalTransport));
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&system, &cancel, false);

        let mut resource = Symlink::new(&new_src, &link);
        assert!(resource.check(&ctx).unwrap());
        assert!(resource.apply(&ctx).unwrap().changed);
        assert_eq!(fs::read_link(&link).unwrap(), new_src);
        assert!(!resource.check(&ctx).unwrap());

        let change = resource.last_change().unwrap();
        assert_eq!(change.action, Action::Modified);

        resource.revert(&ctx).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), old_src);
    }

    #[test]
    fn test_dry_run_keeps_existing_link() {
        let dir = TempDir::new().unwrap();
        let old_src = dir.path().join("v1");
        let new_src = dir.path().join("v2");
        fs::create_dir(&old_src).unwrap();
        fs::create_dir(&new_src).unwrap();
        let link = dir.path().join("current");
        let fresh = dir.path().join("fresh");
        std::os::unix::fs::symlink(&old_src, &link).unwrap();

        let system = System::new(Arc::new(LocalTransport));
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&system, &cancel, true);

        let mut retarget = Symlink::new(&new_src, &link);
        let result = retarget.apply(&ctx).unwrap();
        assert!(result.changed);
        assert!(result.message.starts_with("would retarget"));
        assert_eq!(fs::read_link(&link).unwrap(), old_src);
        assert!(retarget.last_change().is_none());

        let mut create = Symlink::new(&new_src, &fresh);
        assert!(create.apply(&ctx).unwrap().message.starts_with("would create"));
        assert!(fs::symlink_metadata(&fresh).is_err());
    }

    #[test]
    fn test_regular_file_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("config");
        fs::write(&link, "user data").unwrap();

        let system = System::new(Arc::new(LocalTransport));
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&system, &cancel, false);

        let mut resource = Symlink::new(dir.path().join("elsewhere"), &link);
        assert!(resource.apply(&ctx).is_err());
        assert_eq!(fs::read_to_string(&link).unwrap(), "user data");
    }
}

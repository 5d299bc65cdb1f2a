//! Command resource - run a shell command on the target
//!
//! Commands always count as drift unless a guard says otherwise:
//! `creates` (skip when the path exists) or `unless` (skip when that command
//! succeeds). An optional `revert` command makes the resource revertible.

use anyhow::{Result, bail};
use reconcile::{Action, ApplyContext, ApplyResult, Change, Params, Resource};
use std::path::PathBuf;

use super::str_param;

#[derive(Debug, Clone)]
pub struct CommandResource {
    pub name: String,
    pub command: String,
    pub creates: Option<PathBuf>,
    pub unless: Option<String>,
    pub revert: Option<String>,
    ran: bool,
}

impl CommandResource {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            creates: None,
            unless: None,
            revert: None,
            ran: false,
        }
    }

    pub fn from_params(name: &str, params: &Params) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            command: str_param(params, "command")?.unwrap_or(name).to_string(),
            creates: str_param(params, "creates")?.map(crate::paths::expand),
            unless: str_param(params, "unless")?.map(str::to_string),
            revert: str_param(params, "revert")?.map(str::to_string),
            ran: false,
        })
    }

    fn sh(ctx: &ApplyContext, script: &str) -> Result<()> {
        let output = ctx.transport().run("sh", &["-c", script])?;
        if !output.success {
            bail!("'{}' failed: {}", script, output.stderr_str().trim());
        }
        Ok(())
    }
}

impl Resource for CommandResource {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Run `{}`", self.command)
    }

    fn resource_type(&self) -> &'static str {
        "command"
    }

    fn desired_state(&self) -> String {
        "executed".to_string()
    }

    fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            bail!("command must not be empty");
        }
        Ok(())
    }

    fn check(&self, ctx: &ApplyContext) -> Result<bool> {
        if let Some(creates) = &self.creates
            && ctx.transport().exists(creates)?
        {
            return Ok(false);
        }
        if let Some(unless) = &self.unless
            && ctx.transport().run_status("sh", &["-c", unless])?
        {
            return Ok(false);
        }
        Ok(true)
    }

    fn apply(&mut self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if !self.check(ctx)? {
            return Ok(ApplyResult::unchanged("guard satisfied"));
        }
        if ctx.dry_run {
            return Ok(ApplyResult::would(format!("run `{}`", self.command)));
        }

        ctx.cancel.check()?;
        Self::sh(ctx, &self.command)?;
        self.ran = true;
        Ok(ApplyResult::changed(format!("ran `{}`", self.command)))
    }

    fn can_revert(&self) -> bool {
        self.revert.is_some()
    }

    fn revert(&mut self, ctx: &ApplyContext) -> Result<()> {
        if !std::mem::take(&mut self.ran) {
            return Ok(());
        }
        match &self.revert {
            Some(script) => Self::sh(ctx, script),
            None => {
                log::warn!("Manual action required to undo `{}`", self.command);
                Ok(())
            }
        }
    }

    fn last_change(&self) -> Option<Change> {
        self.ran
            .then(|| Change::new(Action::Executed, self.command.clone()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use reconcile::{CancelToken, LocalTransport, System};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_creates_guard_and_revert_command() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("done");
        let marker_str = marker.display().to_string();

        let system = System::new(Arc::new(LocalTransport));
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&system, &cancel, false);

        let mut cmd = CommandResource::new("init", &format!("touch {marker_str}"));
        cmd.creates = Some(marker.clone());
        cmd.revert = Some(format!("rm {marker_str}"));

        assert!(cmd.check(&ctx).unwrap());
        assert!(cmd.apply(&ctx).unwrap().changed);
        assert!(marker.exists());
        assert!(!cmd.check(&ctx).unwrap());
        assert_eq!(cmd.last_change().unwrap().action, Action::Executed);

        cmd.revert(&ctx).unwrap();
        assert!(!marker.exists());
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");

        let system = System::new(Arc::new(LocalTransport));
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&system, &cancel, true);

        let mut cmd = CommandResource::new("init", &format!("touch {}", marker.display()));
        cmd.creates = Some(marker.clone());

        let result = cmd.apply(&ctx).unwrap();
        assert!(result.changed);
        assert!(result.message.starts_with("would run"));
        assert!(!marker.exists());
        assert!(!cmd.can_revert());
        assert!(cmd.last_change().is_none());
    }

    #[test]
    fn test_unless_guard_skips() {
        let system = System::new(Arc::new(LocalTransport));
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&system, &cancel, false);

        let mut cmd = CommandResource::new("noop", "exit 1");
        cmd.unless = Some("true".to_string());
        assert!(!cmd.apply(&ctx).unwrap().changed);
    }

    #[test]
    fn test_failing_command_is_an_error() {
        let system = System::new(Arc::new(LocalTransport));
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(&system, &cancel, false);

        let mut cmd = CommandResource::new("broken", "echo nope >&2; exit 3");
        let err = cmd.apply(&ctx).unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert!(!cmd.can_revert());
    }
}

//! Package resource, installed through the detected package manager

use anyhow::{Result, bail};
use reconcile::{Action, ApplyContext, ApplyResult, Change, Params, Resource, state};

use super::state_param;

#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub state: String,
    last: Option<Action>,
}

impl Package {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: state::PRESENT.to_string(),
            last: None,
        }
    }

    pub fn from_params(name: &str, params: &Params) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            state: state_param(params, &[state::PRESENT, state::ABSENT], state::PRESENT)?,
            last: None,
        })
    }

    fn wants_present(&self) -> bool {
        self.state == state::PRESENT
    }
}

impl Resource for Package {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        if self.wants_present() {
            format!("Install package {}", self.name)
        } else {
            format!("Remove package {}", self.name)
        }
    }

    fn resource_type(&self) -> &'static str {
        "package"
    }

    fn desired_state(&self) -> String {
        self.state.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || self.name.starts_with('-')
            || self.name.contains(char::is_whitespace)
        {
            bail!("invalid package name '{}'", self.name);
        }
        Ok(())
    }

    fn check(&self, ctx: &ApplyContext) -> Result<bool> {
        let packages = ctx.system.require_packages()?;
        let installed = packages.is_installed(ctx.transport(), &self.name)?;
        Ok(installed != self.wants_present())
    }

    fn apply(&mut self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if !self.check(ctx)? {
            return Ok(ApplyResult::unchanged(format!("already {}", self.state)));
        }

        let packages = ctx.system.require_packages()?;
        if ctx.dry_run {
            let verb = if self.wants_present() { "install" } else { "remove" };
            return Ok(ApplyResult::would(format!(
                "{} {} via {}",
                verb,
                self.name,
                packages.name()
            )));
        }

        let action = if self.wants_present() {
            packages.install(ctx.transport(), &self.name)?;
            Action::Installed
        } else {
            packages.remove(ctx.transport(), &self.name)?;
            Action::Removed
        };
        self.last = Some(action);

        Ok(ApplyResult::changed(format!("{} {}", action, self.name)))
    }

    fn can_revert(&self) -> bool {
        true
    }

    fn revert(&mut self, ctx: &ApplyContext) -> Result<()> {
        let packages = ctx.system.require_packages()?;
        match self.last.take() {
            Some(Action::Installed) => packages.remove(ctx.transport(), &self.name),
            Some(_) => packages.install(ctx.transport(), &self.name),
            None => Ok(()),
        }
    }

    fn last_change(&self) -> Option<Change> {
        self.last.map(|action| {
            let prev = if action == Action::Installed {
                state::ABSENT
            } else {
                state::PRESENT
            };
            Change::new(action, self.name.clone()).with_prev_state(prev)
        })
    }
}

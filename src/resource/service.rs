//! Service resource - keep a service running or stopped, or restart it

use anyhow::Result;
use reconcile::{Action, ApplyContext, ApplyResult, Change, Params, Resource, state};
use std::fmt;
use std::sync::Arc;

use super::state_param;
use crate::providers::ServiceBackend;

#[derive(Clone)]
pub struct Service {
    pub name: String,
    pub state: String,
    backend: Arc<dyn ServiceBackend>,
    last: Option<Action>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn new(name: &str, state: &str, backend: Arc<dyn ServiceBackend>) -> Self {
        Self {
            name: name.to_string(),
            state: state.to_string(),
            backend,
            last: None,
        }
    }

    pub fn from_params(
        name: &str,
        params: &Params,
        backend: Arc<dyn ServiceBackend>,
    ) -> Result<Self> {
        let state = state_param(
            params,
            &[state::PRESENT, state::RUNNING, state::STOPPED, state::RESTARTED],
            state::RUNNING,
        )?;
        // The declaration default "present" means running
        let state = if state == state::PRESENT {
            state::RUNNING
        } else {
            state.as_str()
        };
        Ok(Self::new(name, state, backend))
    }
}

impl Resource for Service {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Service {} ({})", self.name, self.state)
    }

    fn resource_type(&self) -> &'static str {
        "service"
    }

    fn desired_state(&self) -> String {
        self.state.clone()
    }

    fn check(&self, ctx: &ApplyContext) -> Result<bool> {
        let running = self.backend.is_running(ctx.transport(), &self.name)?;
        Ok(match self.state.as_str() {
            state::STOPPED => running,
            // A requested restart is always pending
            state::RESTARTED => true,
            _ => !running,
        })
    }

    fn apply(&mut self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if !self.check(ctx)? {
            return Ok(ApplyResult::unchanged(format!("already {}", self.state)));
        }

        let action = match self.state.as_str() {
            state::STOPPED => Action::Stopped,
            state::RESTARTED => Action::Restarted,
            _ => Action::Started,
        };

        if ctx.dry_run {
            let verb = match action {
                Action::Stopped => "stop",
                Action::Restarted => "restart",
                _ => "start",
            };
            return Ok(ApplyResult::would(format!("{} {}", verb, self.name)));
        }

        let transport = ctx.transport();
        match action {
            Action::Stopped => self.backend.stop(transport, &self.name)?,
            Action::Restarted => self.backend.restart(transport, &self.name)?,
            _ => self.backend.start(transport, &self.name)?,
        }
        self.last = Some(action);

        Ok(ApplyResult::changed(format!("{} {}", action, self.name)))
    }

    /// A restart has no inverse
    fn can_revert(&self) -> bool {
        matches!(self.last, Some(Action::Started | Action::Stopped))
    }

    fn revert(&mut self, ctx: &ApplyContext) -> Result<()> {
        match self.last.take() {
            Some(Action::Started) => self.backend.stop(ctx.transport(), &self.name),
            Some(Action::Stopped) => self.backend.start(ctx.transport(), &self.name),
            _ => Ok(()),
        }
    }

    fn last_change(&self) -> Option<Change> {
        self.last.map(|action| {
            let prev = match action {
                Action::Started => state::STOPPED,
                _ => state::RUNNING,
            };
            Change::new(action, self.name.clone()).with_prev_state(prev)
        })
    }
}

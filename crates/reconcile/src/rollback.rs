//! In-process rollback sweep
//!
//! Walks a list of applied resources back to front and asks each one to
//! revert. Rollback is best effort: a failing revert is logged and the sweep
//! carries on, and a partial result is reported rather than hidden.

use crate::context::{ApplyContext, ProgressCallback, StateHook};
use crate::resource::PlannedResource;
use crate::types::StateStatus;
use serde::{Deserialize, Serialize};

/// What a rollback sweep achieved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Ids reverted successfully, in revert order
    pub reverted: Vec<String>,
    /// Ids whose revert failed, with the error
    pub failed: Vec<(String, String)>,
    /// Ids without a revert capability
    pub skipped: Vec<String>,
}

impl RollbackReport {
    /// No revert failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.reverted.is_empty() && self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Merge another sweep into this one
    pub fn merge(&mut self, other: RollbackReport) {
        self.reverted.extend(other.reverted);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
    }
}

/// Revert `applied` (oldest first) in reverse order.
///
/// Each entry is attempted exactly once. Successful reverts are reported to
/// the state hook with [`StateStatus::Reverted`].
pub fn rollback(
    applied: &mut [PlannedResource],
    ctx: &ApplyContext,
    hook: &dyn StateHook,
    progress: &dyn ProgressCallback,
) -> RollbackReport {
    let mut report = RollbackReport::default();

    for planned in applied.iter_mut().rev() {
        let resource = &mut planned.resource;
        if !resource.can_revert() {
            log::debug!("{} has no revert, skipping", planned.id);
            report.skipped.push(planned.id.clone());
            continue;
        }

        log::info!("Reverting {}", planned.id);
        match resource.revert(ctx) {
            Ok(()) => {
                progress.on_revert(&planned.id, None);
                report.reverted.push(planned.id.clone());
                if let Err(e) = hook.update_resource(
                    resource.resource_type(),
                    &resource.id(),
                    &planned.state,
                    StateStatus::Reverted,
                ) {
                    log::warn!("Could not record revert of {}: {:#}", planned.id, e);
                }
            }
            Err(e) => {
                let message = format!("{e:#}");
                log::error!("Revert failed for {}: {}", planned.id, message);
                progress.on_revert(&planned.id, Some(&message));
                report.failed.push((planned.id.clone(), message));
            }
        }
    }

    if !report.is_complete() {
        log::warn!(
            "Rollback incomplete: {} reverted, {} failed, {} without revert",
            report.reverted.len(),
            report.failed.len(),
            report.skipped.len()
        );
    }

    report
}

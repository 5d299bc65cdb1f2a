//! Drift report for a plan, built from `check` only

use crate::context::ApplyContext;
use crate::planner::ExecutionPlan;
use crate::resource::PlannedResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Drift of one planned resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Declaration id
    pub resource_id: String,
    /// Type of the resource
    pub resource_type: String,
    /// Human-readable description
    pub description: String,
    /// Desired state as declared
    pub desired: String,
    /// Layer the resource would run in
    pub layer: usize,
    pub drift: Drift,
}

/// Result of a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Drift {
    InSync,
    Pending,
    /// The check itself failed
    Unknown { error: String },
}

impl ResourceDiff {
    fn from_planned(planned: &PlannedResource, layer: usize, ctx: &ApplyContext) -> Self {
        let drift = match planned.resource.check(ctx) {
            Ok(false) => Drift::InSync,
            Ok(true) => Drift::Pending,
            Err(e) => Drift::Unknown {
                error: format!("{e:#}"),
            },
        };

        Self {
            resource_id: planned.id.clone(),
            resource_type: planned.resource_type().to_string(),
            description: planned.resource.description(),
            desired: planned.state.clone(),
            layer,
            drift,
        }
    }

    /// Whether apply would change this resource
    pub fn has_drift(&self) -> bool {
        matches!(self.drift, Drift::Pending)
    }
}

/// Check every resource in the plan, in layer order
pub fn compute_diffs(plan: &ExecutionPlan, ctx: &ApplyContext) -> Vec<ResourceDiff> {
    plan.layers
        .iter()
        .flat_map(|layer| {
            layer
                .members
                .iter()
                .map(move |p| ResourceDiff::from_planned(p, layer.index, ctx))
        })
        .collect()
}

/// Diff summary statistics
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    pub in_sync: usize,
    pub pending: usize,
    pub unknown: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            match diff.drift {
                Drift::InSync => summary.in_sync += 1,
                Drift::Pending => summary.pending += 1,
                Drift::Unknown { .. } => summary.unknown += 1,
            }
        }
        summary
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.pending > 0
    }
}

/// Group diffs by resource type
pub fn group_by_type(diffs: &[ResourceDiff]) -> BTreeMap<String, Vec<&ResourceDiff>> {
    let mut groups: BTreeMap<String, Vec<&ResourceDiff>> = BTreeMap::new();
    for diff in diffs {
        groups
            .entry(diff.resource_type.clone())
            .or_default()
            .push(diff);
    }
    groups
}

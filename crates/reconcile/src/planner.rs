//! Execution planner - turns declarations into layers of resources
//!
//! Everything that can reject a run (duplicate ids, unknown dependencies,
//! cycles, unknown types, bad parameters) is detected here, before the
//! engine touches the target.

use crate::context::System;
use crate::error::{Error, Result};
use crate::graph::sort_layers;
use crate::resource::{ConfigItem, PlannedResource, ResourceFactory};

/// A batch of resources with no dependency among them
#[derive(Debug)]
pub struct Layer {
    /// Zero-based position in the plan
    pub index: usize,
    pub members: Vec<PlannedResource>,
}

impl Layer {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// An execution plan: layers to run strictly one after another
#[derive(Debug, Default)]
pub struct ExecutionPlan {
    pub layers: Vec<Layer>,
}

impl ExecutionPlan {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Sort, instantiate and validate every item.
    pub fn build(
        items: Vec<ConfigItem>,
        factory: &ResourceFactory,
        system: &System,
    ) -> Result<Self> {
        let sorted = sort_layers(items)?;

        let mut layers = Vec::with_capacity(sorted.len());
        for (index, items) in sorted.into_iter().enumerate() {
            let mut members = Vec::with_capacity(items.len());
            for item in items {
                members.push(instantiate(item, factory, system)?);
            }
            layers.push(Layer { index, members });
        }

        log::debug!(
            "Planned {} resources in {} layers",
            layers.iter().map(Layer::len).sum::<usize>(),
            layers.len()
        );
        Ok(Self { layers })
    }

    /// Append a layer of already-built resources
    pub fn push_layer(&mut self, members: Vec<PlannedResource>) {
        let index = self.layers.len();
        self.layers.push(Layer { index, members });
    }

    /// Flatten into one dependency-ordered list, for sequential execution
    pub fn into_sequence(self) -> Vec<PlannedResource> {
        self.layers.into_iter().flat_map(|l| l.members).collect()
    }

    /// Total number of resources in the plan
    pub fn total_resources(&self) -> usize {
        self.layers.iter().map(Layer::len).sum()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.total_resources() == 0
    }

    /// Iterate every planned resource in layer order
    pub fn resources(&self) -> impl Iterator<Item = &PlannedResource> {
        self.layers.iter().flat_map(|l| l.members.iter())
    }
}

fn instantiate(
    item: ConfigItem,
    factory: &ResourceFactory,
    system: &System,
) -> Result<PlannedResource> {
    // Adapters read the desired state from their parameters
    let mut params = item.params.clone();
    params.insert(
        "state".to_string(),
        serde_json::Value::String(item.state.clone()),
    );

    let resource = factory(&item.resource_type, &item.name, &params, system).map_err(
        |source| Error::Factory {
            resource: item.id.clone(),
            resource_type: item.resource_type.clone(),
            source,
        },
    )?;

    resource.validate().map_err(|e| Error::InvalidParams {
        resource: item.id.clone(),
        message: format!("{e:#}"),
    })?;

    Ok(PlannedResource::new(item.id, item.state, resource))
}

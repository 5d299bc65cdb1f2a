//! Dependency sorter - layered topological ordering
//!
//! Layers are produced with Kahn's algorithm, draining the whole frontier at
//! once: everything in layer `k` depends only on layers `< k`, so members of a
//! layer can run concurrently. Members keep their declaration order.

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Anything with an id and dependency ids
pub trait DependencyNode {
    fn node_id(&self) -> &str;
    fn dependencies(&self) -> &[String];
}

/// Reject duplicate ids and dependencies on unknown ids.
pub fn validate_graph<T: DependencyNode>(nodes: &[T]) -> Result<()> {
    let mut seen = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !seen.insert(node.node_id()) {
            return Err(Error::DuplicateId {
                id: node.node_id().to_string(),
            });
        }
    }

    for node in nodes {
        for dep in node.dependencies() {
            if !seen.contains(dep.as_str()) {
                return Err(Error::UnknownDependency {
                    resource: node.node_id().to_string(),
                    missing: dep.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Sort nodes into parallel-safe layers.
pub fn sort_layers<T: DependencyNode>(nodes: Vec<T>) -> Result<Vec<Vec<T>>> {
    validate_graph(&nodes)?;

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.node_id(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        // A repeated edge counts once
        let deps: HashSet<&str> = node.dependencies().iter().map(String::as_str).collect();
        for dep in deps {
            let d = index[dep];
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut frontier: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut layer_of: Vec<Option<usize>> = vec![None; nodes.len()];
    let mut layer_count = 0;

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for &i in &frontier {
            layer_of[i] = Some(layer_count);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();
        frontier = next;
        layer_count += 1;
    }

    if in_degree.iter().any(|&d| d > 0) {
        let ids = nodes
            .iter()
            .zip(&in_degree)
            .filter(|(_, d)| **d > 0)
            .map(|(n, _)| n.node_id().to_string())
            .collect();
        return Err(Error::Cycle { ids });
    }

    let mut layers: Vec<Vec<T>> = (0..layer_count).map(|_| Vec::new()).collect();
    for (node, layer) in nodes.into_iter().zip(layer_of) {
        // Every node got a layer, otherwise the cycle check above fired
        if let Some(layer) = layer {
            layers[layer].push(node);
        }
    }

    Ok(layers)
}

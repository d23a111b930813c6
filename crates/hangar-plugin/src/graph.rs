//! Plugin dependency graph with cycle detection and topological ordering.

use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor::PluginDescriptor;
use crate::{PluginError, Result};

/// Directed graph: plugin -> plugins it depends on
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a PluginDescriptor>) -> Self {
        let mut graph = Self::new();
        for d in descriptors {
            graph.add(&d.name, d.plugin_dependencies.iter().map(String::as_str));
        }
        graph
    }

    /// Add `name` with its direct dependencies.
    pub fn add<'a>(&mut self, name: &str, deps: impl IntoIterator<Item = &'a str>) {
        self.edges
            .entry(name.to_string())
            .or_default()
            .extend(deps.into_iter().map(str::to_string));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Direct dependencies of `name`.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.edges
            .get(name)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes that directly depend on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(name))
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Every node, dependencies before dependents. Ties break by name.
    ///
    /// Dependencies that are not nodes of the graph are left out.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut pending: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(node, deps)| {
                let inside = deps.iter().filter(|d| self.edges.contains_key(*d)).count();
                (node.as_str(), inside)
            })
            .collect();

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(node) = ready.pop_first() {
            pending.remove(node);
            order.push(node.to_string());
            for (dependent, deps) in &self.edges {
                if deps.contains(node) {
                    if let Some(count) = pending.get_mut(dependent.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(dependent.as_str());
                        }
                    }
                }
            }
        }

        if order.len() < self.edges.len() {
            let start = pending.keys().next().copied().unwrap_or_default();
            return Err(PluginError::DependencyCycle(self.cycle_from(start)));
        }
        Ok(order)
    }

    /// Every plugin `name` depends on, directly or not, dependencies first.
    pub fn transitive_dependencies(&self, name: &str) -> Result<Vec<String>> {
        let mut done = BTreeSet::new();
        let mut stack = Vec::new();
        let mut out = Vec::new();
        self.visit(name, &mut done, &mut stack, &mut out)?;
        out.retain(|n| n != name);
        Ok(out)
    }

    fn visit(
        &self,
        node: &str,
        done: &mut BTreeSet<String>,
        stack: &mut Vec<String>,
        out: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(node) {
            return Ok(());
        }
        if let Some(pos) = stack.iter().position(|n| n == node) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(node.to_string());
            return Err(PluginError::DependencyCycle(cycle));
        }

        stack.push(node.to_string());
        for dep in self.dependencies_of(node) {
            self.visit(&dep, done, stack, out)?;
        }
        stack.pop();

        done.insert(node.to_string());
        out.push(node.to_string());
        Ok(())
    }

    // Walk unresolved edges from `start` until a node repeats.
    fn cycle_from(&self, start: &str) -> Vec<String> {
        let mut path = vec![start.to_string()];
        let mut current = start.to_string();
        loop {
            let next = self
                .edges
                .get(&current)
                .and_then(|deps| deps.iter().find(|d| self.edges.contains_key(*d)));
            let Some(next) = next else {
                return path;
            };
            if let Some(pos) = path.iter().position(|n| n == next) {
                let mut cycle = path.split_off(pos);
                cycle.push(next.clone());
                return cycle;
            }
            path.push(next.clone());
            current = next.clone();
        }
    }
}

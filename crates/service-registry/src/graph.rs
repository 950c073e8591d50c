//! Dependency graph between registered units
//!
//! `dependencies[id]` is the unit's declared dependency set and
//! `dependents[id]` the reverse adjacency. Both are maintained incrementally
//! as units come and go; ids may be referenced before they are registered.

use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Forward and reverse adjacency for registered units
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Declared dependencies per unit
    dependencies: HashMap<String, BTreeSet<String>>,
    /// Registered units that depend on each id
    dependents: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `id` if its dependencies would close a cycle
    pub fn check_acyclic(&self, id: &str, dependencies: &BTreeSet<String>) -> Result<()> {
        if dependencies.contains(id) {
            return Err(Error::CyclicDependency {
                path: vec![id.to_string(), id.to_string()],
            });
        }

        let mut visited = HashSet::new();
        for dep in dependencies {
            let mut path = vec![id.to_string(), dep.clone()];
            if self.reaches(dep, id, &mut visited, &mut path) {
                return Err(Error::CyclicDependency { path });
            }
        }
        Ok(())
    }

    /// Depth-first search from `from` towards `target` along dependency edges
    fn reaches(
        &self,
        from: &str,
        target: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        if !visited.insert(from.to_string()) {
            return false;
        }
        let Some(next) = self.dependencies.get(from) else {
            return false;
        };
        for dep in next {
            path.push(dep.clone());
            if dep == target || self.reaches(dep, target, visited, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    /// Add a unit and its edges
    pub fn insert(&mut self, id: &str, dependencies: &BTreeSet<String>) {
        for dep in dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(id.to_string());
        }
        self.dependencies
            .insert(id.to_string(), dependencies.clone());
    }

    /// Remove a unit and every edge that mentions it as a dependent
    ///
    /// Units that still declare `id` as a dependency keep their entry in
    /// `dependents[id]`, so re-registering `id` restores the reverse edges.
    pub fn remove(&mut self, id: &str) {
        if let Some(deps) = self.dependencies.remove(id) {
            for dep in deps {
                if let Some(set) = self.dependents.get_mut(&dep) {
                    set.remove(id);
                    if set.is_empty() {
                        self.dependents.remove(&dep);
                    }
                }
            }
        }
    }

    /// Whether the unit is part of the graph
    pub fn contains(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    /// Declared dependencies of a unit
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.dependencies
            .get(id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Registered units that depend on `id`
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.dependents
            .get(id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Order units so every dependency precedes its dependents
    ///
    /// Dependencies that are not registered are ignored. Ties keep `order`.
    pub fn topological_order(&self, order: &[String]) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for id in order {
            let degree = self
                .dependencies
                .get(id)
                .map(|deps| deps.iter().filter(|d| self.contains(d)).count())
                .unwrap_or(0);
            in_degree.insert(id.as_str(), degree);
        }

        let mut queue: VecDeque<&str> = order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut result = Vec::with_capacity(order.len());

        while let Some(id) = queue.pop_front() {
            result.push(id.to_string());
            for dependent in order
                .iter()
                .filter(|o| self.dependents_of(id).contains(o))
            {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if result.len() != order.len() {
            return Err(Error::Config("Circular dependency detected".to_string()));
        }
        Ok(result)
    }
}

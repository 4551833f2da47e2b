//! Dependency graph resolution.
//!
//! Resolution walks requires and build-requires edges depth-first with a
//! three-colour visited set. A package is emitted only after all of its
//! dependencies, so [`ResolvedGraph::order`] is a valid build order.
//! Re-entering a package that is still in progress means the graph has a
//! cycle.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PackageError;
use crate::handle::PackageHandle;
use crate::registry::PackageSource;

/// Requirements declared by the consuming (root) package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRequirements {
    pub name: String,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub build_requires: Vec<String>,
}

impl RootRequirements {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            build_requires: Vec::new(),
        }
    }

    pub fn requires(mut self, name: impl Into<String>) -> Self {
        self.requires.push(name.into());
        self
    }

    pub fn build_requires(mut self, name: impl Into<String>) -> Self {
        self.build_requires.push(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Resolves a root's requirements against a [`PackageSource`].
pub struct DependencyGraph<'a> {
    source: &'a dyn PackageSource,
    marks: HashMap<String, Mark>,
    stack: Vec<String>,
    order: Vec<PackageHandle>,
}

impl<'a> DependencyGraph<'a> {
    /// Resolve the full closure of `root`'s requirements.
    pub fn resolve(root: &RootRequirements, source: &'a dyn PackageSource) -> Result<ResolvedGraph, PackageError> {
        let mut graph = DependencyGraph {
            source,
            marks: HashMap::new(),
            stack: Vec::new(),
            order: Vec::new(),
        };

        graph.marks.insert(root.name.clone(), Mark::InProgress);
        graph.stack.push(root.name.clone());
        for name in root.requires.iter().chain(root.build_requires.iter()) {
            graph.visit(name, &root.name)?;
        }

        let runtime = runtime_closure(&root.requires, &graph.order);
        Ok(ResolvedGraph::new(graph.order, runtime))
    }

    fn visit(&mut self, name: &str, required_by: &str) -> Result<(), PackageError> {
        match self.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = self.stack.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle: Vec<String> = self.stack[start..].to_vec();
                cycle.push(name.to_string());
                return Err(PackageError::CyclicDependency { cycle });
            }
            None => {}
        }

        let handle = self.source.resolve(name).ok_or_else(|| PackageError::UnresolvedDependency {
            name: name.to_string(),
            required_by: required_by.to_string(),
        })?;

        self.marks.insert(name.to_string(), Mark::InProgress);
        self.stack.push(name.to_string());

        for dep in handle.requires.iter().chain(handle.build_requires.iter()) {
            self.visit(dep, name)?;
        }

        self.stack.pop();
        self.marks.insert(name.to_string(), Mark::Done);
        debug!(package = %handle.reference(), "resolved package");
        self.order.push(handle);
        Ok(())
    }
}

/// Names reachable from `roots` through `requires` edges only.
fn runtime_closure(roots: &[String], order: &[PackageHandle]) -> BTreeSet<String> {
    let by_name: HashMap<&str, &PackageHandle> = order.iter().map(|h| (h.name.as_str(), h)).collect();
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = roots.iter().map(String::as_str).collect();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.to_string()) {
            continue;
        }
        if let Some(handle) = by_name.get(name) {
            queue.extend(handle.requires.iter().map(String::as_str));
        }
    }

    seen
}

/// Topologically ordered package set.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    order: Vec<PackageHandle>,
    index: HashMap<String, usize>,
    runtime: BTreeSet<String>,
}

impl ResolvedGraph {
    fn new(order: Vec<PackageHandle>, runtime: BTreeSet<String>) -> Self {
        let index = order
            .iter()
            .enumerate()
            .map(|(i, h)| (h.name.clone(), i))
            .collect();
        Self { order, index, runtime }
    }

    /// Every resolved package, dependencies first.
    pub fn order(&self) -> &[PackageHandle] {
        &self.order
    }

    pub fn get(&self, name: &str) -> Option<&PackageHandle> {
        self.index.get(name).map(|&i| &self.order[i])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of a package in the build order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Packages that form the runtime dependency surface, in build order.
    pub fn runtime(&self) -> Vec<&PackageHandle> {
        self.order.iter().filter(|h| self.runtime.contains(&h.name)).collect()
    }

    /// Packages needed only at build time, in build order.
    pub fn build_only(&self) -> Vec<&PackageHandle> {
        self.order.iter().filter(|h| !self.runtime.contains(&h.name)).collect()
    }

    pub fn is_build_only(&self, name: &str) -> bool {
        self.index.contains_key(name) && !self.runtime.contains(name)
    }
}

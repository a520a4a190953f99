//! Dependency graph construction, cycle detection and ordering.

use std::collections::{BTreeMap, BTreeSet, btree_set};

use tracing::debug;

use super::registry::{ResourceRegistry, ResourceSpec};
use super::resolver::{DependencyEdge, ReferenceResolver};
use crate::catalog::Catalog;
use crate::error::GraphError;

/// Acyclic graph over the declared resources.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    registry: ResourceRegistry,
    edges: BTreeSet<DependencyEdge>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

/// Builds a [`ResourceGraph`] from a registry and resolved edges.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl GraphBuilder {
    /// Merges resolved edges with explicit ordering hints and checks the
    /// result is acyclic.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::UnknownDependency` if a hint names an undeclared
    /// resource and `GraphError::Cycle` if the graph contains a cycle.
    pub fn build(
        registry: ResourceRegistry,
        edges: BTreeSet<DependencyEdge>,
    ) -> Result<ResourceGraph, GraphError> {
        let mut edges = edges;

        for spec in registry.all() {
            for hint in &spec.depends_on {
                if !registry.contains(hint) {
                    return Err(GraphError::UnknownDependency {
                        resource: spec.id.clone(),
                        dependency: hint.clone(),
                    });
                }
                edges.insert(DependencyEdge::new(hint.clone(), spec.id.clone()));
            }
        }

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = registry
            .all()
            .map(|spec| (spec.id.clone(), BTreeSet::new()))
            .collect();
        let mut dependents = dependencies.clone();

        for edge in &edges {
            dependencies
                .entry(edge.to.clone())
                .or_default()
                .insert(edge.from.clone());
            dependents
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
        }

        detect_cycle(&dependents)?;

        debug!(
            resources = registry.len(),
            edges = edges.len(),
            "Built dependency graph"
        );

        Ok(ResourceGraph {
            registry,
            edges,
            dependencies,
            dependents,
        })
    }
}

/// Depth-first search from every node in ascending id order, tracking the
/// nodes currently on the traversal path.
fn detect_cycle(dependents: &BTreeMap<String, BTreeSet<String>>) -> Result<(), GraphError> {
    let empty = BTreeSet::new();
    let successors = |id: &str| dependents.get(id).unwrap_or(&empty).iter();

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

    for root in dependents.keys() {
        if marks.contains_key(root.as_str()) {
            continue;
        }

        let mut stack: Vec<(&str, btree_set::Iter<'_, String>)> = Vec::new();
        marks.insert(root.as_str(), Mark::Visiting);
        stack.push((root.as_str(), successors(root)));

        loop {
            let next = match stack.last_mut() {
                Some((_, children)) => children.next(),
                None => break,
            };

            match next {
                Some(child) => match marks.get(child.as_str()) {
                    Some(Mark::Visiting) => {
                        let start = stack
                            .iter()
                            .position(|(id, _)| *id == child.as_str())
                            .unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|(id, _)| (*id).to_string()).collect();
                        cycle.push(child.clone());
                        return Err(GraphError::Cycle { cycle });
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child.as_str(), Mark::Visiting);
                        stack.push((child.as_str(), successors(child)));
                    }
                },
                None => {
                    if let Some((id, _)) = stack.pop() {
                        marks.insert(id, Mark::Done);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Kahn's algorithm with a priority-ordered ready queue.
///
/// `edges` are `(before, after)` pairs. Nodes that sit on or behind a cycle
/// are left out of the result, so callers compare lengths to detect one.
pub fn kahn_order<K>(nodes: &BTreeSet<K>, edges: &BTreeSet<(K, K)>) -> Vec<K>
where
    K: Ord + Clone,
{
    let mut in_degree: BTreeMap<&K, usize> = nodes.iter().map(|n| (n, 0)).collect();
    let mut successors: BTreeMap<&K, Vec<&K>> = BTreeMap::new();

    for (before, after) in edges {
        if !in_degree.contains_key(before) {
            continue;
        }
        if let Some(degree) = in_degree.get_mut(after) {
            *degree += 1;
            successors.entry(before).or_default().push(after);
        }
    }

    let mut ready: BTreeSet<&K> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.clone());
        for next in successors.get(node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(*next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*next);
                }
            }
        }
    }

    order
}

impl ResourceGraph {
    /// Resolves references and builds the graph in one step.
    ///
    /// # Errors
    ///
    /// Returns any reference, hint or cycle error.
    pub fn from_registry(registry: ResourceRegistry, catalog: &Catalog) -> Result<Self, GraphError> {
        let edges = ReferenceResolver::new(catalog).resolve(&registry)?;
        GraphBuilder::build(registry, edges)
    }

    /// Resources in dependency order, ties broken by ascending id.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        let nodes: BTreeSet<&str> = self.registry.all().map(|s| s.id.as_str()).collect();
        let edges: BTreeSet<(&str, &str)> = self
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        kahn_order(&nodes, &edges)
    }

    /// Direct dependencies of a resource.
    pub fn dependencies_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Direct dependents of a resource.
    pub fn dependents_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Looks up a declared resource.
    #[must_use]
    pub fn spec(&self, id: &str) -> Option<&ResourceSpec> {
        self.registry.get(id)
    }

    /// Returns true if `id` is declared.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// All declared resources in ascending id order.
    pub fn specs(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.registry.all()
    }

    /// All edges.
    #[must_use]
    pub const fn edges(&self) -> &BTreeSet<DependencyEdge> {
        &self.edges
    }

    /// Number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Returns true if no resources are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

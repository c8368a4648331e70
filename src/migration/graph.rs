//! Migration definition graph
//!
//! This module provides functionality to:
//! - Build the dependency graph from loader output
//! - Resolve squash definitions (`replaces`) and redirect edges to them
//! - Record dependencies that point outside the loaded set
//! - Detect cycles and compute the canonical topological order used by replay

use crate::error::{AuditError, CyclicGraphError};
use crate::migration::{MigrationDefinition, MigrationId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A dependency that names an identity absent from the loaded set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DanglingDependency {
    pub dependent: MigrationId,
    pub missing: MigrationId,
}

/// Directed graph over migration identities, edges from dependency to dependent
///
/// The graph is built once per audit run and never mutated afterwards. Node
/// identities replaced by a squash definition are not nodes: they only remain
/// reachable through [`MigrationGraph::resolve`].
#[derive(Debug, Clone)]
pub struct MigrationGraph {
    nodes: BTreeMap<MigrationId, MigrationDefinition>,
    /// Definitions removed by squash resolution
    replaced: BTreeMap<MigrationId, MigrationDefinition>,
    /// Replaced identity → surviving squash (transitive)
    replaced_by: BTreeMap<MigrationId, MigrationId>,
    dependencies: BTreeMap<MigrationId, Vec<MigrationId>>,
    /// Dependency identities as declared, before redirection to squashes
    declared: BTreeMap<MigrationId, Vec<MigrationId>>,
    dependents: BTreeMap<MigrationId, BTreeSet<MigrationId>>,
    dangling: Vec<DanglingDependency>,
    order: Vec<MigrationId>,
    loaded: usize,
}

impl MigrationGraph {
    /// Build and validate the graph
    ///
    /// # Errors
    ///
    /// Returns `AuditError::InvalidDefinition` if two definitions share an
    /// identity, a definition replaces itself, or two squashes claim the same
    /// identity. Returns `AuditError::CyclicGraph` if the dependency edges
    /// contain a cycle.
    pub fn build(
        definitions: impl IntoIterator<Item = MigrationDefinition>,
    ) -> Result<Self, AuditError> {
        let mut all: BTreeMap<MigrationId, MigrationDefinition> = BTreeMap::new();
        for definition in definitions {
            if all.contains_key(&definition.id) {
                return Err(AuditError::InvalidDefinition(format!(
                    "migration {} is defined more than once",
                    definition.id
                )));
            }
            all.insert(definition.id.clone(), definition);
        }
        let loaded = all.len();

        // Direct replacement claims
        let mut direct: HashMap<MigrationId, MigrationId> = HashMap::new();
        for definition in all.values() {
            for replaced in &definition.replaces {
                if *replaced == definition.id {
                    return Err(AuditError::InvalidDefinition(format!(
                        "squash migration {} lists itself in replaces",
                        definition.id
                    )));
                }
                if let Some(other) = direct.insert(replaced.clone(), definition.id.clone()) {
                    return Err(AuditError::InvalidDefinition(format!(
                        "migration {} is replaced by both {} and {}",
                        replaced, other, definition.id
                    )));
                }
            }
        }

        // Resolve chains (a squash of a squash) to the surviving squash
        let mut replaced_by = BTreeMap::new();
        for replaced in direct.keys() {
            let mut target = &direct[replaced];
            let mut steps = 0;
            while let Some(next) = direct.get(target) {
                target = next;
                steps += 1;
                if steps > direct.len() {
                    return Err(AuditError::InvalidDefinition(format!(
                        "replacement chain starting at {replaced} never terminates"
                    )));
                }
            }
            replaced_by.insert(replaced.clone(), target.clone());
        }

        let mut nodes = BTreeMap::new();
        let mut replaced = BTreeMap::new();
        for (id, definition) in all {
            if replaced_by.contains_key(&id) {
                replaced.insert(id, definition);
            } else {
                nodes.insert(id, definition);
            }
        }

        let mut graph = Self {
            nodes,
            replaced,
            replaced_by,
            dependencies: BTreeMap::new(),
            declared: BTreeMap::new(),
            dependents: BTreeMap::new(),
            dangling: Vec::new(),
            order: Vec::new(),
            loaded,
        };
        graph.resolve_edges();
        graph.order = graph.topological_order()?;

        log::debug!(
            "Built migration graph: {} node(s), {} replaced, {} dangling dependency(ies)",
            graph.nodes.len(),
            graph.replaced.len(),
            graph.dangling.len()
        );

        Ok(graph)
    }

    fn resolve_edges(&mut self) {
        let mut dangling = BTreeSet::new();

        for (id, definition) in &self.nodes {
            // A squash inherits the dependencies of everything it replaces
            let mut raw: Vec<&MigrationId> = definition.dependencies.iter().collect();
            for (replaced_id, target) in &self.replaced_by {
                if target == id {
                    if let Some(replaced) = self.replaced.get(replaced_id) {
                        raw.extend(replaced.dependencies.iter());
                    }
                }
            }

            let mut declared: Vec<MigrationId> = Vec::with_capacity(raw.len());
            let mut resolved = BTreeSet::new();
            for dependency in raw {
                if !declared.contains(dependency) {
                    declared.push(dependency.clone());
                }
                if self.nodes.contains_key(dependency) {
                    resolved.insert(dependency.clone());
                } else if let Some(target) = self.replaced_by.get(dependency) {
                    // Redirected edges that land on the squash itself are internal
                    if target != id {
                        resolved.insert(target.clone());
                    }
                } else {
                    dangling.insert(DanglingDependency {
                        dependent: id.clone(),
                        missing: dependency.clone(),
                    });
                }
            }

            for dependency in &resolved {
                self.dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(id.clone());
            }
            self.dependencies
                .insert(id.clone(), resolved.into_iter().collect());
            self.declared.insert(id.clone(), declared);
        }

        self.dangling = dangling.into_iter().collect();
    }

    /// Kahn's algorithm with a deterministic ready set
    ///
    /// Ready definitions are taken by (declared in-graph dependency count, identity).
    fn topological_order(&self) -> Result<Vec<MigrationId>, CyclicGraphError> {
        let mut in_degree: BTreeMap<&MigrationId, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id, deps.len()))
            .collect();

        let mut ready: BTreeSet<(usize, &MigrationId)> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| (0, *id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(entry) = ready.iter().next().copied() {
            ready.remove(&entry);
            let (_, current) = entry;
            order.push(current.clone());

            if let Some(dependents) = self.dependents.get(current) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert((self.dependency_count(dependent), dependent));
                        }
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let placed: BTreeSet<&MigrationId> = order.iter().collect();
            Err(self.find_cycle(&placed))
        }
    }

    /// Walk dependency edges among unplaced nodes until one repeats
    fn find_cycle(&self, placed: &BTreeSet<&MigrationId>) -> CyclicGraphError {
        let remaining = |id: &MigrationId| self.nodes.contains_key(id) && !placed.contains(id);

        let Some(start) = self.nodes.keys().find(|id| remaining(*id)) else {
            return CyclicGraphError { cycle: Vec::new() };
        };

        let mut path: Vec<&MigrationId> = Vec::new();
        let mut seen: HashMap<&MigrationId, usize> = HashMap::new();
        let mut current = start;
        loop {
            if let Some(&position) = seen.get(current) {
                // path runs dependent → dependency; report dependency → dependent
                let mut cycle: Vec<MigrationId> =
                    path[position..].iter().rev().map(|id| (*id).clone()).collect();
                if let Some(min_at) = cycle
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.cmp(b.1))
                    .map(|(i, _)| i)
                {
                    cycle.rotate_left(min_at);
                }
                return CyclicGraphError { cycle };
            }
            seen.insert(current, path.len());
            path.push(current);

            // Every unplaced node keeps at least one unplaced dependency
            match self
                .dependencies
                .get(current)
                .and_then(|deps| deps.iter().find(|dep| remaining(*dep)))
            {
                Some(next) => current = next,
                None => {
                    return CyclicGraphError {
                        cycle: path.iter().map(|id| (*id).clone()).collect(),
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: &MigrationId) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &MigrationId) -> Option<&MigrationDefinition> {
        self.nodes.get(id)
    }

    /// Node identities in lexical order
    pub fn ids(&self) -> impl Iterator<Item = &MigrationId> {
        self.nodes.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of definitions the loader supplied, replaced ones included
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.loaded
    }

    /// Resolved in-graph dependencies of a node, sorted
    #[must_use]
    pub fn dependencies(&self, id: &MigrationId) -> &[MigrationId] {
        self.dependencies.get(id).map_or(&[], Vec::as_slice)
    }

    /// Declared dependency identities of `id` that resolve to `dependency`
    ///
    /// For an edge redirected to a squash these are the replaced identities
    /// the definition actually named.
    pub fn declared_through<'a>(
        &'a self,
        id: &MigrationId,
        dependency: &'a MigrationId,
    ) -> impl Iterator<Item = &'a MigrationId> + 'a {
        self.declared
            .get(id)
            .into_iter()
            .flatten()
            .filter(move |declared| self.resolve(declared) == Some(dependency))
    }

    fn dependency_count(&self, id: &MigrationId) -> usize {
        self.dependencies(id).len()
    }

    /// Direct dependents of a node, sorted
    pub fn dependents(&self, id: &MigrationId) -> impl Iterator<Item = &MigrationId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Map an identity to the node that stands for it
    ///
    /// Nodes resolve to themselves; replaced identities resolve to their squash.
    #[must_use]
    pub fn resolve(&self, id: &MigrationId) -> Option<&MigrationId> {
        match self.nodes.get_key_value(id) {
            Some((key, _)) => Some(key),
            None => self.replaced_by.get(id),
        }
    }

    /// The surviving squash that replaced `id`, if any
    #[must_use]
    pub fn replaced_by(&self, id: &MigrationId) -> Option<&MigrationId> {
        self.replaced_by.get(id)
    }

    /// Every identity that resolves to `squash`, nested replacements included
    pub fn replaced_ids<'a>(
        &'a self,
        squash: &'a MigrationId,
    ) -> impl Iterator<Item = &'a MigrationId> + 'a {
        self.replaced_by
            .iter()
            .filter(move |(_, target)| *target == squash)
            .map(|(replaced, _)| replaced)
    }

    /// The removed definition for a replaced identity, if it was loaded
    #[must_use]
    pub fn replaced_definition(&self, id: &MigrationId) -> Option<&MigrationDefinition> {
        self.replaced.get(id)
    }

    /// Squash definitions that survived resolution
    pub fn squashes(&self) -> impl Iterator<Item = &MigrationDefinition> {
        self.nodes.values().filter(|definition| definition.is_squash())
    }

    /// Squash definitions loaded, including squashes that were themselves replaced
    #[must_use]
    pub fn squash_count(&self) -> usize {
        self.nodes
            .values()
            .chain(self.replaced.values())
            .filter(|definition| definition.is_squash())
            .count()
    }

    /// Number of identities logically removed by squashes
    #[must_use]
    pub fn replaced_count(&self) -> usize {
        self.replaced_by.len()
    }

    #[must_use]
    pub fn dangling(&self) -> &[DanglingDependency] {
        &self.dangling
    }

    #[must_use]
    pub fn has_dangling_dependency(&self, id: &MigrationId) -> bool {
        self.dangling.iter().any(|d| d.dependent == *id)
    }

    /// Canonical topological order used by replay
    #[must_use]
    pub fn canonical_order(&self) -> &[MigrationId] {
        &self.order
    }

    /// Every node `id` transitively depends on
    #[must_use]
    pub fn ancestors(&self, id: &MigrationId) -> BTreeSet<MigrationId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&MigrationId> = self.dependencies(id).iter().collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current.clone()) {
                stack.extend(self.dependencies(current));
            }
        }
        seen
    }

    /// Every node that transitively depends on `id`
    #[must_use]
    pub fn descendants(&self, id: &MigrationId) -> BTreeSet<MigrationId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&MigrationId> = self.dependents(id).collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current.clone()) {
                stack.extend(self.dependents(current));
            }
        }
        seen
    }

    /// Nodes nothing depends on
    pub fn leaf_nodes(&self) -> impl Iterator<Item = &MigrationId> {
        self.nodes
            .keys()
            .filter(|id| self.dependents.get(*id).map_or(true, BTreeSet::is_empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> MigrationId {
        MigrationId::new("app", name)
    }

    fn def(name: &str, deps: &[&str]) -> MigrationDefinition {
        deps.iter()
            .fold(MigrationDefinition::new("app", name), |d, dep| d.depends_on(id(dep)))
    }

    #[test]
    fn test_canonical_order_simple_chain() {
        let graph = MigrationGraph::build(vec![
            def("0003", &["0002"]),
            def("0001", &[]),
            def("0002", &["0001"]),
        ])
        .unwrap();
        assert_eq!(graph.canonical_order(), &[id("0001"), id("0002"), id("0003")]);
    }

    #[test]
    fn test_canonical_order_prefers_fewer_dependencies() {
        // b and c both become ready once d is placed; c declared fewer dependencies
        let graph = MigrationGraph::build(vec![
            def("a", &[]),
            def("d", &["a"]),
            def("b", &["a", "d"]),
            def("c", &["d"]),
        ])
        .unwrap();
        assert_eq!(graph.canonical_order(), &[id("a"), id("d"), id("c"), id("b")]);
    }

    #[test]
    fn test_canonical_order_lexical_tie_break() {
        let graph = MigrationGraph::build(vec![def("b", &[]), def("a", &[]), def("c", &[])]).unwrap();
        assert_eq!(graph.canonical_order(), &[id("a"), id("b"), id("c")]);
    }

    #[test]
    fn test_cycle_is_rejected_with_members() {
        let err = MigrationGraph::build(vec![
            def("0001", &["0003"]),
            def("0002", &["0001"]),
            def("0003", &["0002"]),
            def("0004", &[]),
        ])
        .unwrap_err();
        match err {
            AuditError::CyclicGraph(cycle) => {
                assert_eq!(cycle.cycle, vec![id("0001"), id("0002"), id("0003")]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = MigrationGraph::build(vec![def("0001", &["0001"])]).unwrap_err();
        assert!(matches!(err, AuditError::CyclicGraph(ref c) if c.cycle == vec![id("0001")]));
    }

    #[test]
    fn test_dangling_dependency_is_recorded_not_fatal() {
        let graph = MigrationGraph::build(vec![def("0002", &["0001"])]).unwrap();
        assert_eq!(
            graph.dangling(),
            &[DanglingDependency {
                dependent: id("0002"),
                missing: id("0001")
            }]
        );
        assert!(graph.has_dangling_dependency(&id("0002")));
        assert_eq!(graph.canonical_order(), &[id("0002")]);
    }

    #[test]
    fn test_duplicate_definition_is_fatal() {
        let err = MigrationGraph::build(vec![def("0001", &[]), def("0001", &[])]).unwrap_err();
        assert!(matches!(err, AuditError::InvalidDefinition(_)));
    }

    #[test]
    fn test_squash_removes_replaced_and_redirects_edges() {
        let squash = def("0001_squashed_0002", &[])
            .replaces(id("0001"))
            .replaces(id("0002"));
        let graph = MigrationGraph::build(vec![
            def("0001", &[]),
            def("0002", &["0001"]),
            squash,
            def("0003", &["0002"]),
        ])
        .unwrap();

        assert!(!graph.contains(&id("0001")));
        assert!(!graph.contains(&id("0002")));
        assert_eq!(graph.dependencies(&id("0003")), &[id("0001_squashed_0002")]);
        assert!(graph.dependencies(&id("0001_squashed_0002")).is_empty());
        assert_eq!(graph.resolve(&id("0001")), Some(&id("0001_squashed_0002")));
        assert_eq!(
            graph
                .declared_through(&id("0003"), &id("0001_squashed_0002"))
                .collect::<Vec<_>>(),
            vec![&id("0002")]
        );
        assert_eq!(graph.loaded_count(), 4);
        assert_eq!(graph.replaced_count(), 2);
        assert_eq!(graph.squash_count(), 1);
    }

    #[test]
    fn test_nested_squash_resolves_transitively() {
        let graph = MigrationGraph::build(vec![
            def("s1", &[]).replaces(id("0001")),
            def("s2", &[]).replaces(id("s1")),
            def("0002", &["0001"]),
        ])
        .unwrap();
        assert_eq!(graph.resolve(&id("0001")), Some(&id("s2")));
        assert_eq!(graph.dependencies(&id("0002")), &[id("s2")]);
        assert_eq!(graph.squash_count(), 2);
    }

    #[test]
    fn test_identity_replaced_twice_is_fatal() {
        let err = MigrationGraph::build(vec![
            def("s1", &[]).replaces(id("0001")),
            def("s2", &[]).replaces(id("0001")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("replaced by both"));
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let graph = MigrationGraph::build(vec![
            def("a", &[]),
            def("b", &["a"]),
            def("c", &["b"]),
            def("d", &[]),
        ])
        .unwrap();
        assert_eq!(graph.ancestors(&id("c")), [id("a"), id("b")].into_iter().collect());
        assert_eq!(graph.descendants(&id("a")), [id("b"), id("c")].into_iter().collect());
        let leaves: Vec<&MigrationId> = graph.leaf_nodes().collect();
        assert_eq!(leaves, vec![&id("c"), &id("d")]);
    }
}

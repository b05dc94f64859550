//! Hydration - validate a graph and derive its reverse edges
//!
//! Hydration never touches the input graph. It returns a [`HydratedGraph`]
//! where every entry also knows its dependents, together with a stable
//! dependency-first ordering.
//!
//! # Ordering
//!
//! The order is computed with Kahn's algorithm. Among entries that become
//! ready at the same time the smallest id goes first, so the same graph always
//! produces the same order.

use crate::entry::{Entry, Graph};
use crate::error::GraphError;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// An entry plus the ids of the entries that depend on it
#[derive(Debug, Clone, PartialEq)]
pub struct HydratedEntry {
    pub entry: Entry,
    /// Entries declaring this one as a dependency, sorted by id
    pub dependents: Vec<String>,
}

impl HydratedEntry {
    pub fn id(&self) -> &str {
        &self.entry.entry_id
    }

    pub fn entry_type(&self) -> &str {
        &self.entry.entry_type
    }

    pub fn dependencies(&self) -> &[String] {
        &self.entry.dependencies
    }

    pub fn dependents(&self) -> &[String] {
        &self.dependents
    }
}

/// A validated, acyclic graph with reverse edges
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydratedGraph {
    entries: BTreeMap<String, HydratedEntry>,
    order: Vec<String>,
}

impl HydratedGraph {
    pub fn get(&self, entry_id: &str) -> Option<&HydratedEntry> {
        self.entries.get(entry_id)
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.entries.contains_key(entry_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by id
    pub fn entries(&self) -> impl Iterator<Item = &HydratedEntry> {
        self.entries.values()
    }

    /// Ids sorted lexically
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Ids with every dependency before its dependents
    pub fn dependency_order(&self) -> &[String] {
        &self.order
    }

    /// Ids with every dependent before its dependencies
    pub fn dependents_order(&self) -> impl Iterator<Item = &String> {
        self.order.iter().rev()
    }

    /// All entries that depend on `entry_id`, directly or transitively
    pub fn transitive_dependents(&self, entry_id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![entry_id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.entries.get(id) {
                for dependent in &node.dependents {
                    if seen.insert(dependent.clone()) {
                        stack.push(dependent.as_str());
                    }
                }
            }
        }
        seen
    }
}

/// Validate `graph` and derive dependents
///
/// Fails with:
/// - [`GraphError::EntryNotFound`] when an entry is stored under a key other
///   than its own id
/// - [`GraphError::DependencyNotFound`] when a dependency id is not in the graph
/// - [`GraphError::CycleDetected`] when the dependency edges form a cycle
pub fn hydrate(graph: &Graph) -> Result<HydratedGraph, GraphError> {
    for (key, entry) in graph.iter() {
        if key != entry.entry_id {
            return Err(GraphError::entry_not_found(&entry.entry_id));
        }
    }

    let mut dependents: HashMap<&str, Vec<String>> = HashMap::new();
    for entry in graph.entries() {
        for dependency in unique(&entry.dependencies) {
            if !graph.contains(dependency) {
                return Err(GraphError::dependency_not_found(&entry.entry_id, dependency));
            }
            // Entries iterate in id order, so each list ends up sorted
            dependents
                .entry(dependency)
                .or_default()
                .push(entry.entry_id.clone());
        }
    }

    let entries: BTreeMap<String, HydratedEntry> = graph
        .entries()
        .map(|entry| {
            let hydrated = HydratedEntry {
                entry: entry.clone(),
                dependents: dependents.remove(entry.entry_id.as_str()).unwrap_or_default(),
            };
            (entry.entry_id.clone(), hydrated)
        })
        .collect();

    let order = dependency_order(&entries)?;
    log::trace!("hydrated {} entries", entries.len());

    Ok(HydratedGraph { entries, order })
}

/// Kahn's algorithm with smallest-id-first tie breaking
fn dependency_order(entries: &BTreeMap<String, HydratedEntry>) -> Result<Vec<String>, GraphError> {
    let mut in_degree: HashMap<&str, usize> = entries
        .iter()
        .map(|(id, node)| (id.as_str(), unique(node.dependencies()).count()))
        .collect();

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(entries.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for dependent in &entries[id].dependents {
            if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent.as_str());
                }
            }
        }
    }

    if order.len() != entries.len() {
        let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
        let path = find_cycle(entries, &placed);
        return Err(GraphError::cycle(&path));
    }

    Ok(order)
}

/// Locate one cycle among the entries Kahn's algorithm could not place
///
/// Three-color DFS over dependency edges: an edge back into the current
/// stack closes a cycle.
fn find_cycle(entries: &BTreeMap<String, HydratedEntry>, placed: &HashSet<&str>) -> Vec<String> {
    fn visit<'a>(
        id: &'a str,
        entries: &'a BTreeMap<String, HydratedEntry>,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        stack.push(id);
        for dependency in entries[id].dependencies() {
            if let Some(pos) = stack.iter().position(|s| *s == dependency.as_str()) {
                return Some(stack[pos..].iter().map(|s| (*s).to_string()).collect());
            }
            if !visited.contains(dependency.as_str())
                && let Some(cycle) = visit(dependency, entries, visited, stack)
            {
                return Some(cycle);
            }
        }
        stack.pop();
        None
    }

    let mut visited = HashSet::new();
    for id in entries.keys().filter(|id| !placed.contains(id.as_str())) {
        if visited.contains(id.as_str()) {
            continue;
        }
        let mut stack = Vec::new();
        if let Some(cycle) = visit(id, entries, &mut visited, &mut stack) {
            return cycle;
        }
    }
    // Unreachable for a graph Kahn's algorithm rejected
    entries
        .keys()
        .filter(|id| !placed.contains(id.as_str()))
        .cloned()
        .collect()
}

/// Dependencies with duplicates removed, first occurrence wins
fn unique(dependencies: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = HashSet::new();
    dependencies
        .iter()
        .map(String::as_str)
        .filter(move |d| seen.insert(*d))
}

//! Entry model
//!
//! An [`Entry`] is one managed unit of infrastructure state. A [`Graph`] maps
//! entry ids to entries and is what gets persisted between runs. The JSON shape
//! is exactly the entry fields keyed by `entryId`; derived data such as
//! dependents is never part of it.

use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::btree_map;

/// A declared resource record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Resource type tag used to look up the handler
    #[serde(rename = "type")]
    pub entry_type: String,

    /// Stable id assigned by the caller
    pub entry_id: String,

    /// Ids this entry depends on, unique and in declaration order
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Per-type configuration
    #[serde(default)]
    pub parameters: Value,

    /// Per-type output of the last successful create/update/replace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Entry {
    /// Create an entry with no dependencies and no result
    pub fn new(entry_type: impl Into<String>, entry_id: impl Into<String>, parameters: Value) -> Self {
        Self {
            entry_type: entry_type.into(),
            entry_id: entry_id.into(),
            dependencies: Vec::new(),
            parameters,
            result: None,
        }
    }

    /// Builder-style dependency declaration (duplicates are ignored)
    pub fn depends_on(mut self, entry_id: impl Into<String>) -> Self {
        let entry_id = entry_id.into();
        if !self.dependencies.contains(&entry_id) {
            self.dependencies.push(entry_id);
        }
        self
    }

    /// Copy of this entry carrying the given result
    pub fn with_result(mut self, result: Option<Value>) -> Self {
        self.result = result;
        self
    }
}

/// Map of entry id to entry for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    entries: BTreeMap<String, Entry>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry unless one with the same id exists; return the stored entry
    pub fn attach(&mut self, entry: Entry) -> &Entry {
        match self.entries.entry(entry.entry_id.clone()) {
            btree_map::Entry::Occupied(existing) => {
                log::trace!("entry {} already attached", entry.entry_id);
                existing.into_mut()
            }
            btree_map::Entry::Vacant(slot) => slot.insert(entry),
        }
    }

    /// Record that `from` depends on `to`
    ///
    /// Appends `to` once; `to` itself is only checked during hydration.
    pub fn link_dependency(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        let entry = self
            .entries
            .get_mut(from)
            .ok_or_else(|| GraphError::entry_not_found(from))?;
        if !entry.dependencies.iter().any(|d| d == to) {
            entry.dependencies.push(to.to_string());
        }
        Ok(())
    }

    /// Insert or overwrite an entry under its own id
    pub fn insert(&mut self, entry: Entry) -> Option<Entry> {
        self.entries.insert(entry.entry_id.clone(), entry)
    }

    /// Insert an entry under an arbitrary key
    ///
    /// Only useful for reproducing corrupted snapshots in tests.
    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, key: &str, entry: Entry) {
        self.entries.insert(key.to_string(), entry);
    }

    pub fn remove(&mut self, entry_id: &str) -> Option<Entry> {
        self.entries.remove(entry_id)
    }

    pub fn get(&self, entry_id: &str) -> Option<&Entry> {
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

    /// Iterate `(key, entry)` pairs sorted by key
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate entries sorted by id
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Parse a persisted snapshot
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Serialize as a persisted snapshot
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl FromIterator<Entry> for Graph {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        let mut graph = Self::new();
        for entry in iter {
            graph.insert(entry);
        }
        graph
    }
}

impl<'a> IntoIterator for &'a Graph {
    type Item = (&'a String, &'a Entry);
    type IntoIter = btree_map::Iter<'a, String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

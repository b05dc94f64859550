//! Diff computation for entries
//!
//! Diffs are for reporting only. They never drive what the executor does.

use crate::entry::Entry;
use crate::types::Action;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// One changed leaf of an entry's parameters (or its dependency list)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Dotted path, e.g. `parameters.memory` or `dependencies`
    pub path: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl FieldChange {
    pub fn is_addition(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    pub fn is_removal(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }
}

/// A reportable difference for one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDiff {
    pub entry_id: String,
    pub entry_type: String,
    pub action: Action,
    pub changes: Vec<FieldChange>,
}

impl EntryDiff {
    /// Diff of an update, `None` when parameters and dependencies are equal
    pub fn between(candidate: &Entry, current: &Entry) -> Option<Self> {
        let mut changes = Vec::new();
        diff_values(
            "parameters",
            Some(&current.parameters),
            Some(&candidate.parameters),
            &mut changes,
        );
        if candidate.dependencies != current.dependencies {
            changes.push(FieldChange {
                path: "dependencies".to_string(),
                before: Some(Value::from(current.dependencies.clone())),
                after: Some(Value::from(candidate.dependencies.clone())),
            });
        }

        if changes.is_empty() {
            return None;
        }
        Some(Self {
            entry_id: candidate.entry_id.clone(),
            entry_type: candidate.entry_type.clone(),
            action: Action::Update,
            changes,
        })
    }

    /// Diff of a create: every parameter is an addition
    pub fn created(entry: &Entry) -> Self {
        let mut changes = Vec::new();
        diff_values("parameters", None, Some(&entry.parameters), &mut changes);
        Self {
            entry_id: entry.entry_id.clone(),
            entry_type: entry.entry_type.clone(),
            action: Action::Create,
            changes,
        }
    }

    /// Diff of a delete: every parameter is a removal
    pub fn deleted(entry: &Entry) -> Self {
        let mut changes = Vec::new();
        diff_values("parameters", Some(&entry.parameters), None, &mut changes);
        Self {
            entry_id: entry.entry_id.clone(),
            entry_type: entry.entry_type.clone(),
            action: Action::Delete,
            changes,
        }
    }

    /// A diff with no field detail, for handlers that only know something changed
    pub fn opaque(entry: &Entry, action: Action) -> Self {
        Self {
            entry_id: entry.entry_id.clone(),
            entry_type: entry.entry_type.clone(),
            action,
            changes: Vec::new(),
        }
    }

    pub fn is_addition(&self) -> bool {
        self.action == Action::Create
    }

    pub fn is_removal(&self) -> bool {
        self.action == Action::Delete
    }

    pub fn is_modification(&self) -> bool {
        matches!(self.action, Action::Update | Action::Replace)
    }
}

/// Append the leaf-level differences between two JSON values
///
/// Objects are walked key by key; arrays and scalars are compared whole.
pub fn diff_values(path: &str, before: Option<&Value>, after: Option<&Value>, out: &mut Vec<FieldChange>) {
    match (before, after) {
        (Some(Value::Object(b)), Some(Value::Object(a))) => {
            let keys: BTreeSet<&String> = b.keys().chain(a.keys()).collect();
            for key in keys {
                diff_values(&join(path, key), b.get(key), a.get(key), out);
            }
        }
        (Some(Value::Object(b)), None) => {
            for (key, value) in b {
                diff_values(&join(path, key), Some(value), None, out);
            }
        }
        (None, Some(Value::Object(a))) => {
            for (key, value) in a {
                diff_values(&join(path, key), None, Some(value), out);
            }
        }
        (Some(b), Some(a)) if b == a => {}
        (None, None) | (Some(Value::Null), None) | (None, Some(Value::Null)) => {}
        (b, a) => out.push(FieldChange {
            path: path.to_string(),
            before: b.cloned(),
            after: a.cloned(),
        }),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of entries to create
    pub additions: usize,
    /// Number of entries to delete
    pub removals: usize,
    /// Number of entries to update
    pub modifications: usize,
    /// Number of entries left alone
    pub unchanged: usize,
}

impl DiffSummary {
    /// Count planned actions
    pub fn from_actions(actions: impl IntoIterator<Item = Action>) -> Self {
        let mut summary = Self::default();
        for action in actions {
            match action {
                Action::Create => summary.additions += 1,
                Action::Delete => summary.removals += 1,
                Action::Update | Action::Replace => summary.modifications += 1,
                Action::Noop => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group diffs by entry type
pub fn group_by_type(diffs: &[EntryDiff]) -> HashMap<String, Vec<&EntryDiff>> {
    let mut groups: HashMap<String, Vec<&EntryDiff>> = HashMap::new();
    for diff in diffs {
        groups.entry(diff.entry_type.clone()).or_default().push(diff);
    }
    groups
}

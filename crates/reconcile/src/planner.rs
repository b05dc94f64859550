//! Planner - compares a target graph against the previous one
//!
//! Planning is pure: only `equals`, `preview` and registry lookups run, never a
//! handler mutation.

use crate::diff::{DiffSummary, EntryDiff};
use crate::entry::{Entry, Graph};
use crate::error::PlanError;
use crate::handler::HandlerRegistry;
use crate::hydrate::{HydratedGraph, hydrate};
use crate::types::{Action, PreviewOptions};
use std::fmt;

/// One planned action for a single entry
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub action: Action,
    pub entry_id: String,
    /// Entry from the target graph
    pub candidate: Option<Entry>,
    /// Entry from the previous graph
    pub current: Option<Entry>,
}

impl Step {
    fn new(action: Action, candidate: Option<&Entry>, current: Option<&Entry>) -> Self {
        let entry_id = candidate
            .or(current)
            .map(|e| e.entry_id.clone())
            .unwrap_or_default();
        Self {
            action,
            entry_id,
            candidate: candidate.cloned(),
            current: current.cloned(),
        }
    }

    /// Type of the entry, taken from the candidate when there is one
    pub fn entry_type(&self) -> &str {
        self.candidate
            .as_ref()
            .or(self.current.as_ref())
            .map_or("", |e| e.entry_type.as_str())
    }

    /// Human-readable description, e.g. `create queue 3f2a...`
    pub fn description(&self) -> String {
        format!("{} {} {}", self.action, self.entry_type(), self.entry_id)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Options for a planning pass
#[derive(Debug, Clone, Copy)]
pub struct PlanOptions<'a> {
    pub handlers: &'a HandlerRegistry,
    /// Plan an update even when `equals` says nothing changed
    pub force: bool,
}

impl<'a> PlanOptions<'a> {
    pub fn new(handlers: &'a HandlerRegistry) -> Self {
        Self {
            handlers,
            force: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Ordered steps plus the diffs to report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Target steps in dependency order, then deletes in reverse dependency order
    pub steps: Vec<Step>,
    /// Reportable diffs, in step order
    pub diffs: Vec<EntryDiff>,
}

impl Plan {
    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_actions(self.steps.iter().map(|s| s.action))
    }

    pub fn has_changes(&self) -> bool {
        self.steps.iter().any(|s| s.action.is_change())
    }

    /// Steps that mutate something
    pub fn changes(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.action.is_change())
    }

    pub fn step(&self, entry_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.entry_id == entry_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Hydrate an optional graph, treating `None` as empty
pub(crate) fn hydrate_both(
    target: Option<&Graph>,
    previous: Option<&Graph>,
) -> Result<(HydratedGraph, HydratedGraph), PlanError> {
    let empty = Graph::new();
    let target = hydrate(target.unwrap_or(&empty)).map_err(PlanError::target)?;
    let previous = hydrate(previous.unwrap_or(&empty)).map_err(PlanError::previous)?;
    Ok((target, previous))
}

/// Compute the steps that converge `previous` onto `target`
///
/// `None` for `target` plans a full teardown; `None` for `previous` means
/// nothing exists yet. Fails on an invalid graph or an entry type without a
/// registered handler.
pub fn plan(
    target: Option<&Graph>,
    previous: Option<&Graph>,
    options: &PlanOptions<'_>,
) -> Result<Plan, PlanError> {
    let (target, previous) = hydrate_both(target, previous)?;
    let mut plan = Plan::default();

    let ordered = target
        .dependency_order()
        .iter()
        .filter_map(|id| target.get(id));
    for node in ordered {
        let candidate = &node.entry;
        let handler = options.handlers.require(candidate)?;

        let Some(current) = previous.get(candidate.entry_id.as_str()).map(|n| &n.entry) else {
            plan.diffs.push(EntryDiff::created(candidate));
            plan.steps.push(Step::new(Action::Create, Some(candidate), None));
            continue;
        };

        let same_type = candidate.entry_type == current.entry_type;
        let unchanged = same_type && handler.equals(candidate, current);
        if unchanged && !options.force {
            plan.steps.push(Step::new(Action::Noop, Some(candidate), Some(current)));
            continue;
        }

        let preview = PreviewOptions { force: unchanged };
        match handler.preview(candidate, current, &preview) {
            Some(diff) => plan.diffs.push(diff),
            None if unchanged => plan.diffs.push(EntryDiff::opaque(candidate, Action::Update)),
            None => {}
        }
        plan.steps.push(Step::new(Action::Update, Some(candidate), Some(current)));
    }

    for id in previous.dependents_order() {
        if target.contains(id) {
            continue;
        }
        let Some(current) = previous.get(id).map(|n| &n.entry) else {
            continue;
        };
        options.handlers.require(current)?;
        plan.diffs.push(EntryDiff::deleted(current));
        plan.steps.push(Step::new(Action::Delete, None, Some(current)));
    }

    let summary = plan.summary();
    log::debug!(
        "planned {} steps: {} to create, {} to update, {} to delete, {} unchanged",
        plan.len(),
        summary.additions,
        summary.modifications,
        summary.removals,
        summary.unchanged
    );
    Ok(plan)
}

//! Step context and progress callbacks
//!
//! A [`StepContext`] is the read-only view a handler gets while one of its
//! mutations runs. It exposes the entries already applied for the step's own
//! dependencies during the current pass, so a handler can read identifiers a
//! dependency's handler just produced.

use crate::entry::Entry;
use crate::planner::Step;
use crate::types::{Action, ApplySummary, StepOutcome};
use anyhow::{Context as _, Result, anyhow};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Read-only view handed to handler mutations
#[derive(Debug, Clone)]
pub struct StepContext {
    entry_id: String,
    action: Action,
    dependencies: BTreeMap<String, Entry>,
    cancel: CancellationToken,
}

impl StepContext {
    /// Build a context from the applied dependency entries
    ///
    /// The executor builds these; handlers only need this in their own tests.
    pub fn new(
        entry_id: impl Into<String>,
        action: Action,
        dependencies: impl IntoIterator<Item = Entry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            action,
            dependencies: dependencies
                .into_iter()
                .map(|e| (e.entry_id.clone(), e))
                .collect(),
            cancel,
        }
    }

    /// Id of the entry being applied
    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Action the executor is performing
    pub fn action(&self) -> Action {
        self.action
    }

    /// An applied dependency entry
    pub fn dependency(&self, entry_id: &str) -> Option<&Entry> {
        self.dependencies.get(entry_id)
    }

    /// The result of an applied dependency
    pub fn dependency_result(&self, entry_id: &str) -> Option<&Value> {
        self.dependency(entry_id)?.result.as_ref()
    }

    /// Results of all dependencies of the given type, sorted by id
    pub fn results_of_type<'a>(
        &'a self,
        entry_type: &str,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> {
        self.dependencies
            .values()
            .filter(move |e| e.entry_type == entry_type)
            .filter_map(|e| Some((e.entry_id.as_str(), e.result.as_ref()?)))
    }

    /// The result of the only dependency of the given type
    pub fn single_result_of_type(&self, entry_type: &str) -> Result<&Value> {
        let mut results = self.results_of_type(entry_type);
        let (_, first) = results.next().ok_or_else(|| {
            anyhow!(
                "{} has no applied dependency of type '{}'",
                self.entry_id,
                entry_type
            )
        })?;
        if results.next().is_some() {
            anyhow::bail!(
                "{} has more than one dependency of type '{}'",
                self.entry_id,
                entry_type
            );
        }
        Ok(first)
    }

    /// Deserialize the result of the only dependency of the given type
    pub fn result_as<T: DeserializeOwned>(&self, entry_type: &str) -> Result<T> {
        let value = self.single_result_of_type(entry_type)?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("Invalid '{entry_type}' result for {}", self.entry_id))
    }

    /// Token cancelled when the pass is aborted
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Progress callback for apply passes
///
/// Callbacks are invoked from the scheduling loop, never concurrently.
pub trait ProgressCallback: Send {
    /// Called once before any step starts
    fn on_apply_start(&mut self, total: usize);

    /// Called when a step's handler is about to run
    fn on_step_start(&mut self, step: &Step);

    /// Called when a step reaches a terminal state (including skips)
    fn on_step_complete(&mut self, outcome: &StepOutcome);

    /// Called once after the last step
    fn on_apply_complete(&mut self, summary: &ApplySummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_apply_start(&mut self, _total: usize) {}
    fn on_step_start(&mut self, _step: &Step) {}
    fn on_step_complete(&mut self, _outcome: &StepOutcome) {}
    fn on_apply_complete(&mut self, _summary: &ApplySummary) {}
}

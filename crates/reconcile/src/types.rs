//! Core types shared by the planner and executor

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a step does to its entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Entry exists only in the target graph
    Create,
    /// Entry exists in both graphs and differs (or `force` is set)
    Update,
    /// Entry exists only in the previous graph
    Delete,
    /// In-place update refused by the handler; resource is replaced
    Replace,
    /// Entry exists in both graphs and is equal
    Noop,
}

impl Action {
    /// Whether the step mutates real infrastructure
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Noop)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a single step after apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// Entry was created
    Created,
    /// Entry was updated in place
    Updated,
    /// Entry was replaced
    Replaced,
    /// Entry was deleted
    Deleted,
    /// No changes needed
    Unchanged,
    /// Handler failed (details in the error list)
    Failed { error: String },
    /// Step was never attempted
    Skipped { reason: String },
}

impl StepStatus {
    /// Check if the status represents success (no failure, not skipped)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }

    /// Check if the status represents a change
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated | Self::Replaced | Self::Deleted
        )
    }
}

/// Outcome of one step, in completion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub entry_id: String,
    pub entry_type: String,
    /// Action the planner chose
    pub action: Action,
    pub status: StepStatus,
}

/// Summary of apply results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ApplySummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of steps processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.failed + self.skipped
    }

    /// Add a step status to the summary
    pub fn add_status(&mut self, status: &StepStatus) {
        match status {
            StepStatus::Created => self.created += 1,
            StepStatus::Updated => self.updated += 1,
            StepStatus::Replaced => self.replaced += 1,
            StepStatus::Deleted => self.deleted += 1,
            StepStatus::Unchanged => self.unchanged += 1,
            StepStatus::Failed { .. } => self.failed += 1,
            StepStatus::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Options handed to [`crate::Handler::preview`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewOptions {
    /// The step is being planned only because `force` was requested
    pub force: bool,
}

/// Options for an apply pass
#[derive(Debug, Clone)]
pub struct ApplyOptions<'a> {
    /// Registered handlers
    pub handlers: &'a crate::HandlerRegistry,
    /// Treat equal entries as updates
    pub force: bool,
    /// Maximum number of concurrently running steps (`None` = unbounded)
    pub max_concurrency: Option<usize>,
    /// Per-step timeout for handler mutations
    pub step_timeout: Option<Duration>,
    /// Cancels in-flight steps and skips unstarted ones
    pub cancel: CancellationToken,
}

impl<'a> ApplyOptions<'a> {
    pub fn new(handlers: &'a crate::HandlerRegistry) -> Self {
        Self {
            handlers,
            force: false,
            max_concurrency: None,
            step_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn max_concurrency(mut self, jobs: usize) -> Self {
        self.max_concurrency = Some(jobs.max(1));
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Planner view of these options
    pub fn plan_options(&self) -> crate::PlanOptions<'a> {
        crate::PlanOptions {
            handlers: self.handlers,
            force: self.force,
        }
    }
}

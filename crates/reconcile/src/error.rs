//! Error types for reconciliation
//!
//! Structural and configuration errors abort a pass and are returned as `Err`.
//! Per-entry failures during apply are collected as [`StepError`] values and
//! never abort the pass.

use crate::types::Action;
use std::time::Duration;
use thiserror::Error;

/// Structural errors found while hydrating a graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An entry is not reachable under its own id
    #[error("entry not found: {entry_id}")]
    EntryNotFound { entry_id: String },

    /// A declared dependency is missing from the graph
    #[error("dependency '{dependency_id}' of entry '{entry_id}' does not exist")]
    DependencyNotFound {
        entry_id: String,
        dependency_id: String,
    },

    /// The dependency edges form a cycle
    #[error("dependency cycle detected: {path}")]
    CycleDetected { path: String },
}

impl GraphError {
    pub fn entry_not_found(entry_id: impl Into<String>) -> Self {
        Self::EntryNotFound {
            entry_id: entry_id.into(),
        }
    }

    pub fn dependency_not_found(
        entry_id: impl Into<String>,
        dependency_id: impl Into<String>,
    ) -> Self {
        Self::DependencyNotFound {
            entry_id: entry_id.into(),
            dependency_id: dependency_id.into(),
        }
    }

    /// Build a cycle error from the ids along the cycle, closing the loop
    pub fn cycle(path: &[String]) -> Self {
        let mut ids: Vec<&str> = path.iter().map(String::as_str).collect();
        if let Some(first) = path.first() {
            ids.push(first);
        }
        Self::CycleDetected {
            path: ids.join(" -> "),
        }
    }
}

/// Errors raised while registering handlers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A handler for this type tag is already registered
    #[error("a provider for type '{entry_type}' is already registered")]
    DuplicateProvider { entry_type: String },
}

/// Fatal errors of a planning or apply pass
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The target or previous graph is structurally invalid
    #[error("invalid {which} graph: {source}")]
    InvalidGraph {
        which: &'static str,
        #[source]
        source: GraphError,
    },

    /// No handler is registered for an entry's type
    #[error("no provider registered for type '{entry_type}' (entry '{entry_id}')")]
    HandlerNotFound {
        entry_type: String,
        entry_id: String,
    },
}

impl PlanError {
    pub(crate) fn target(source: GraphError) -> Self {
        Self::InvalidGraph {
            which: "target",
            source,
        }
    }

    pub(crate) fn previous(source: GraphError) -> Self {
        Self::InvalidGraph {
            which: "previous",
            source,
        }
    }

    /// The underlying structural error, if any
    pub fn graph_error(&self) -> Option<&GraphError> {
        match self {
            Self::InvalidGraph { source, .. } => Some(source),
            Self::HandlerNotFound { .. } => None,
        }
    }
}

/// Raised by a handler that cannot replace a resource which is still live.
///
/// Handlers return it through `anyhow` (`Err(ReplaceNotSupported::new(id).into())`);
/// the executor recognises it and reports [`StepError::ReplaceNotSupported`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entry '{entry_id}' cannot be replaced while its resource exists")]
pub struct ReplaceNotSupported {
    pub entry_id: String,
}

impl ReplaceNotSupported {
    pub fn new(entry_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
        }
    }
}

/// A per-entry failure collected during apply
#[derive(Debug, Error)]
pub enum StepError {
    /// The handler refused to replace a live resource
    #[error("{entry_id}: replace not supported while the resource exists")]
    ReplaceNotSupported { entry_id: String },

    /// The handler did not finish within the step timeout
    #[error("{entry_id}: {action} timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        entry_id: String,
        action: Action,
        timeout: Duration,
    },

    /// The pass was cancelled while the handler was running
    #[error("{entry_id}: {action} cancelled")]
    Cancelled { entry_id: String, action: Action },

    /// The handler returned an error
    #[error("{entry_id}: {action} failed: {source:#}")]
    Handler {
        entry_id: String,
        action: Action,
        #[source]
        source: anyhow::Error,
    },
}

impl StepError {
    /// Classify an error returned by a handler method
    pub(crate) fn from_handler(entry_id: &str, action: Action, source: anyhow::Error) -> Self {
        if source.downcast_ref::<ReplaceNotSupported>().is_some() {
            return Self::ReplaceNotSupported {
                entry_id: entry_id.to_string(),
            };
        }
        Self::Handler {
            entry_id: entry_id.to_string(),
            action,
            source,
        }
    }

    /// Id of the entry whose step failed
    pub fn entry_id(&self) -> &str {
        match self {
            Self::ReplaceNotSupported { entry_id }
            | Self::Timeout { entry_id, .. }
            | Self::Cancelled { entry_id, .. }
            | Self::Handler { entry_id, .. } => entry_id,
        }
    }

    /// Action that was being attempted
    pub fn action(&self) -> Action {
        match self {
            Self::ReplaceNotSupported { .. } => Action::Replace,
            Self::Timeout { action, .. }
            | Self::Cancelled { action, .. }
            | Self::Handler { action, .. } => *action,
        }
    }
}

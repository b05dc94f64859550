//! # Reconcile
//!
//! A generic engine that converges declared resources onto real ones.
//!
//! Callers describe what should exist as a [`Graph`] of [`Entry`] values and
//! hand over the graph saved by the previous run. The engine works out which
//! entries to create, update or delete, runs the per-type [`Handler`]s in
//! dependency order and returns the graph to save for next time.
//!
//! ## Core Concepts
//!
//! - **Entry**: one managed resource record (`type`, `entryId`, dependencies,
//!   parameters, result)
//! - **Hydration**: validating a graph and deriving its reverse edges
//! - **Handler**: the comparison and mutation strategy for one resource type
//! - **Plan**: the ordered create/update/delete/noop steps plus diffs
//! - **Apply**: running a plan, isolating failures to the affected subtree
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{ApplyOptions, Entry, Graph, HandlerRegistry, StateStore, deploy};
//! use serde_json::json;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("queue", QueueHandler::new(client))?;
//! registry.register("function", FunctionHandler::new(client))?;
//!
//! let mut target = Graph::new();
//! target.attach(Entry::new("queue", "q-jobs", json!({"name": "jobs"})));
//! target.attach(Entry::new("function", "fn-worker", json!({"memory": 256})));
//! target.link_dependency("fn-worker", "q-jobs")?;
//!
//! let previous = store.load()?;
//! let applied = deploy(Some(&target), previous.as_ref(), &ApplyOptions::new(&registry)).await?;
//! store.save(&applied.result)?;
//!
//! for error in &applied.errors {
//!     eprintln!("{error}");
//! }
//! ```
//!
//! ## Extension Points
//!
//! - [`Handler`]: implemented once per resource type and registered by type tag
//! - [`ProgressCallback`]: receives step progress during apply
//! - [`StateStore`]: where snapshots live between runs
//!
//! Nothing here is global: registries, stores and options are plain values
//! passed into each call.

pub mod context;
pub mod diff;
pub mod entry;
pub mod error;
pub mod executor;
pub mod handler;
pub mod hydrate;
pub mod planner;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use context::{NoProgress, ProgressCallback, StepContext};
pub use diff::{DiffSummary, EntryDiff, FieldChange, diff_values, group_by_type};
pub use entry::{Entry, Graph};
pub use error::{GraphError, PlanError, RegistryError, ReplaceNotSupported, StepError};
pub use executor::{ApplyResult, apply, apply_with_progress, deploy};
pub use handler::{Handler, HandlerRegistry};
pub use hydrate::{HydratedEntry, HydratedGraph, hydrate};
pub use planner::{Plan, PlanOptions, Step, plan};
pub use store::{MemoryStore, StateStore};
pub use types::{Action, ApplyOptions, ApplySummary, PreviewOptions, StepOutcome, StepStatus};

pub use tokio_util::sync::CancellationToken;

//! Handler trait and registry
//!
//! A [`Handler`] is the strategy for one resource type: how to compare two
//! entries of that type and how to create, update, replace and delete the
//! real resource. Handlers are looked up by the entry's type tag in a
//! [`HandlerRegistry`], an open table that provider code fills at startup.

use crate::context::StepContext;
use crate::diff::EntryDiff;
use crate::entry::Entry;
use crate::error::{PlanError, RegistryError, ReplaceNotSupported};
use crate::types::PreviewOptions;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Comparison and mutation strategy for one resource type
///
/// `equals`, `preview` and `can_update_in_place` must be pure. They run during
/// planning and must not touch real infrastructure.
///
/// # Example
///
/// ```ignore
/// use reconcile::{Entry, Handler, StepContext};
/// use serde_json::{Value, json};
///
/// struct QueueHandler { client: QueueClient }
///
/// #[async_trait::async_trait]
/// impl Handler for QueueHandler {
///     async fn create(&self, candidate: &Entry, _ctx: &StepContext) -> anyhow::Result<Value> {
///         let url = self.client.create(&candidate.parameters["name"]).await?;
///         Ok(json!({ "url": url }))
///     }
///
///     async fn update(&self, candidate: &Entry, _current: &Entry, ctx: &StepContext) -> anyhow::Result<Value> {
///         self.create(candidate, ctx).await
///     }
///
///     async fn delete(&self, current: &Entry, _ctx: &StepContext) -> anyhow::Result<()> {
///         self.client.delete(&current.parameters["name"]).await
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Whether `candidate` needs no change relative to `current`
    ///
    /// Default compares parameters and dependencies.
    fn equals(&self, candidate: &Entry, current: &Entry) -> bool {
        candidate.parameters == current.parameters && candidate.dependencies == current.dependencies
    }

    /// Reportable difference between two entries, `None` when nothing to show
    fn preview(
        &self,
        candidate: &Entry,
        current: &Entry,
        _options: &PreviewOptions,
    ) -> Option<EntryDiff> {
        EntryDiff::between(candidate, current)
    }

    /// Whether the change can be applied with `update`
    ///
    /// Returning `false` makes the executor call `replace` instead.
    fn can_update_in_place(&self, _candidate: &Entry, _current: &Entry) -> bool {
        true
    }

    /// Create the resource and return its result
    async fn create(&self, candidate: &Entry, ctx: &StepContext) -> Result<Value>;

    /// Update the resource in place and return its new result
    async fn update(&self, candidate: &Entry, current: &Entry, ctx: &StepContext) -> Result<Value>;

    /// Replace the resource
    ///
    /// Default refuses while `current` still has a live result and falls back
    /// to `create` otherwise.
    async fn replace(&self, candidate: &Entry, current: &Entry, ctx: &StepContext) -> Result<Value> {
        if current.result.is_some() {
            return Err(ReplaceNotSupported::new(&candidate.entry_id).into());
        }
        self.create(candidate, ctx).await
    }

    /// Delete the resource
    async fn delete(&self, current: &Entry, ctx: &StepContext) -> Result<()>;
}

/// Table of handlers keyed by type tag
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `entry_type`
    ///
    /// Fails with [`RegistryError::DuplicateProvider`] if the type is taken.
    pub fn register<H>(&mut self, entry_type: impl Into<String>, handler: H) -> Result<(), RegistryError>
    where
        H: Handler + 'static,
    {
        self.register_shared(entry_type, Arc::new(handler))
    }

    /// Register an already shared handler
    pub fn register_shared(
        &mut self,
        entry_type: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let entry_type = entry_type.into();
        if self.handlers.contains_key(&entry_type) {
            return Err(RegistryError::DuplicateProvider { entry_type });
        }
        log::debug!("registered provider for '{entry_type}'");
        self.handlers.insert(entry_type, handler);
        Ok(())
    }

    pub fn get(&self, entry_type: &str) -> Option<&dyn Handler> {
        self.handlers.get(entry_type).map(AsRef::as_ref)
    }

    /// Handler for an entry, or [`PlanError::HandlerNotFound`]
    pub fn require(&self, entry: &Entry) -> Result<&dyn Handler, PlanError> {
        self.get(&entry.entry_type)
            .ok_or_else(|| PlanError::HandlerNotFound {
                entry_type: entry.entry_type.clone(),
                entry_id: entry.entry_id.clone(),
            })
    }

    pub fn contains(&self, entry_type: &str) -> bool {
        self.handlers.contains_key(entry_type)
    }

    /// Registered type tags, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .finish()
    }
}

pub mod deploy;
pub mod state;

use anyhow::{Context as _, Result};
use reconcile::{Graph, HandlerRegistry};
use std::path::Path;

use crate::config::KeelConfig;
use crate::provider;
use crate::stack::Stack;
use crate::state::FileStateStore;

/// Everything a command needs besides its own arguments
pub struct Session {
    pub config: KeelConfig,
    pub store: FileStateStore,
    pub registry: HandlerRegistry,
}

impl Session {
    pub fn open(state_flag: Option<&Path>) -> Result<Self> {
        let config = KeelConfig::load()?;
        let state_file = config.state_file(state_flag)?;
        log::debug!("Using state file {}", state_file.display());

        let mut registry = HandlerRegistry::new();
        provider::register_all(&mut registry).context("Failed to register providers")?;

        Ok(Self {
            config,
            store: FileStateStore::new(state_file),
            registry,
        })
    }
}

/// Target graph for a stack file
pub fn load_target(stack_file: &Path) -> Result<Graph> {
    let stack = Stack::load(stack_file)?;
    if stack.is_empty() {
        log::warn!("{} declares no resources", stack_file.display());
    }
    for declaration in stack.declarations() {
        log::debug!("declared {} as {}", declaration.label(), declaration.entry_id());
    }
    stack
        .to_graph()
        .with_context(|| format!("Invalid stack file: {}", stack_file.display()))
}

//! Snapshot persistence boundary

use crate::entry::Graph;
use anyhow::Result;
use std::sync::Mutex;

/// Loads and saves the graph of the last apply
pub trait StateStore {
    /// Last saved graph, `None` when nothing was saved yet
    fn load(&self) -> Result<Option<Graph>>;

    /// Replace the saved graph
    fn save(&self, graph: &Graph) -> Result<()>;
}

/// In-memory store, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    graph: Mutex<Option<Graph>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an existing snapshot
    pub fn with_graph(graph: Graph) -> Self {
        Self {
            graph: Mutex::new(Some(graph)),
        }
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<Graph>> {
        let graph = self
            .graph
            .lock()
            .map_err(|_| anyhow::anyhow!("state lock poisoned"))?;
        Ok(graph.clone())
    }

    fn save(&self, graph: &Graph) -> Result<()> {
        let mut slot = self
            .graph
            .lock()
            .map_err(|_| anyhow::anyhow!("state lock poisoned"))?;
        *slot = Some(graph.clone());
        log::debug!("saved {} entries to memory store", graph.len());
        Ok(())
    }
}

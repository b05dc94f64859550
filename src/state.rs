//! Snapshot persistence on disk
//!
//! The snapshot is the graph returned by the last apply, stored as pretty JSON
//! keyed by entry id.

use anyhow::{Context, Result};
use reconcile::{Graph, StateStore};
use std::fs;
use std::path::{Path, PathBuf};

/// JSON snapshot file
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    /// Load the snapshot, or `None` if the file doesn't exist
    fn load(&self) -> Result<Option<Graph>> {
        if !self.path.exists() {
            log::debug!("State file {} does not exist", self.path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let graph = Graph::from_json(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;

        log::debug!("Loaded {} entries from {}", graph.len(), self.path.display());
        Ok(Some(graph))
    }

    /// Write to a sibling temp file, then rename over the snapshot
    fn save(&self, graph: &Graph) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content = graph
            .to_json_pretty()
            .context("Failed to serialize state to JSON")?;
        let temp = self.temp_path();
        fs::write(&temp, content + "\n")
            .with_context(|| format!("Failed to write state file: {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;

        log::debug!("Saved {} entries to {}", graph.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::Entry;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("nested").join("state.json"));

        let mut graph = Graph::new();
        graph.attach(Entry::new("directory", "d1", json!({"path": "/tmp/site"})));
        graph.attach(
            Entry::new("file", "f1", json!({"filename": "a.txt"}))
                .depends_on("d1")
                .with_result(Some(json!({"path": "/tmp/site/a.txt"}))),
        );
        store.save(&graph).unwrap();

        assert_eq!(store.load().unwrap(), Some(graph));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_snapshot_shape() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));

        let mut graph = Graph::new();
        graph.attach(Entry::new("directory", "d1", json!({"path": "/tmp/site"})));
        graph.attach(Entry::new("file", "f1", json!({})).depends_on("d1"));
        store.save(&graph).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["f1"]["entryId"], "f1");
        assert_eq!(raw["f1"]["dependencies"], json!(["d1"]));
        assert!(raw["d1"].get("dependents").is_none());
        assert!(raw["d1"].get("result").is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();

        let err = FileStateStore::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("Failed to parse state file"));
    }
}

//! Directory provider

use anyhow::{Context, Result};
use async_trait::async_trait;
use reconcile::{Entry, Handler, StepContext};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{params, result_field};

pub const TYPE: &str = "directory";

#[derive(Debug, Deserialize)]
struct Params {
    path: PathBuf,
}

/// Ensures a directory exists; removes it again only while empty
#[derive(Debug, Default)]
pub struct DirectoryProvider;

impl DirectoryProvider {
    async fn ensure(path: &Path) -> Result<Value> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        log::debug!("Ensured directory {}", path.display());
        Ok(json!({ "path": path }))
    }
}

#[async_trait]
impl Handler for DirectoryProvider {
    fn can_update_in_place(&self, candidate: &Entry, current: &Entry) -> bool {
        candidate.parameters.get("path") == current.parameters.get("path")
    }

    async fn create(&self, candidate: &Entry, _ctx: &StepContext) -> Result<Value> {
        let params: Params = params(candidate)?;
        Self::ensure(&params.path).await
    }

    async fn update(&self, candidate: &Entry, _current: &Entry, _ctx: &StepContext) -> Result<Value> {
        let params: Params = params(candidate)?;
        Self::ensure(&params.path).await
    }

    async fn delete(&self, current: &Entry, _ctx: &StepContext) -> Result<()> {
        let Some(path) = result_field(current.result.as_ref(), "path") else {
            log::debug!("{} was never created, nothing to remove", current.entry_id);
            return Ok(());
        };

        match tokio::fs::remove_dir(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("Directory already gone: {}", path.display());
                Ok(())
            }
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove directory (not empty?): {}", path.display())
            }),
        }
    }
}

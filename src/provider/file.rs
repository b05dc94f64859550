//! File provider - writes declared content into a managed directory

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reconcile::{Entry, Handler, StepContext};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::{dependency_path, directory, params, result_field};

pub const TYPE: &str = "file";

#[derive(Debug, Deserialize)]
struct Params {
    /// Name of the `directory` declaration holding the file
    directory: String,
    filename: String,
    #[serde(default)]
    content: String,
}

impl Params {
    fn target(&self, ctx: &StepContext) -> Result<PathBuf> {
        let mut components = Path::new(&self.filename).components();
        if !matches!(components.next(), Some(Component::Normal(_))) || components.next().is_some() {
            bail!("filename must be a single path component: {}", self.filename);
        }
        let dir = dependency_path(ctx, directory::TYPE, &self.directory)?;
        Ok(dir.join(&self.filename))
    }
}

/// BLAKE3 hex digest of file content
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Default)]
pub struct FileProvider;

impl FileProvider {
    async fn write(path: &Path, content: &str) -> Result<Value> {
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write file: {}", path.display()))?;
        log::debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(json!({ "path": path, "hash": content_hash(content) }))
    }

    async fn remove(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("File already gone: {}", path.display());
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to remove file: {}", path.display())),
        }
    }
}

#[async_trait]
impl Handler for FileProvider {
    fn can_update_in_place(&self, candidate: &Entry, current: &Entry) -> bool {
        ["directory", "filename"]
            .iter()
            .all(|field| candidate.parameters.get(field) == current.parameters.get(field))
    }

    async fn create(&self, candidate: &Entry, ctx: &StepContext) -> Result<Value> {
        let params: Params = params(candidate)?;
        let path = params.target(ctx)?;

        match tokio::fs::read_to_string(&path).await {
            Ok(existing) if existing == params.content => {
                log::debug!("{} already has the declared content", path.display());
            }
            Ok(_) => bail!(
                "{} already exists with different content",
                path.display()
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read file: {}", path.display()));
            }
        }
        Self::write(&path, &params.content).await
    }

    async fn update(&self, candidate: &Entry, _current: &Entry, ctx: &StepContext) -> Result<Value> {
        let params: Params = params(candidate)?;
        let path = params.target(ctx)?;
        Self::write(&path, &params.content).await
    }

    /// Remove the old file, then create at the new location
    async fn replace(&self, candidate: &Entry, current: &Entry, ctx: &StepContext) -> Result<Value> {
        if let Some(old) = result_field(current.result.as_ref(), "path") {
            Self::remove(&old).await?;
        }
        self.create(candidate, ctx).await
    }

    async fn delete(&self, current: &Entry, _ctx: &StepContext) -> Result<()> {
        match result_field(current.result.as_ref(), "path") {
            Some(path) => Self::remove(&path).await,
            None => Ok(()),
        }
    }
}

//! Symlink provider - links a path to a managed file

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reconcile::{Entry, Handler, StepContext};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{dependency_path, file, params, result_field};

pub const TYPE: &str = "symlink";

#[derive(Debug, Deserialize)]
struct Params {
    /// Name of the `file` declaration the link points at
    file: String,
    /// Where the link is created
    link: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
enum LinkState {
    Missing,
    Correct,
    WrongTarget(PathBuf),
    FileExists,
}

async fn check_current(link: &Path, target: &Path) -> Result<LinkState> {
    let metadata = match tokio::fs::symlink_metadata(link).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LinkState::Missing),
        Err(e) => return Err(e).with_context(|| format!("Failed to inspect {}", link.display())),
    };

    if !metadata.file_type().is_symlink() {
        return Ok(LinkState::FileExists);
    }

    let actual = tokio::fs::read_link(link)
        .await
        .with_context(|| format!("Failed to read symlink: {}", link.display()))?;
    if actual == target {
        Ok(LinkState::Correct)
    } else {
        Ok(LinkState::WrongTarget(actual))
    }
}

async fn create_symlink(link: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
    }

    #[cfg(unix)]
    tokio::fs::symlink(target, link).await.with_context(|| {
        format!(
            "Failed to create symlink: {} -> {}",
            link.display(),
            target.display()
        )
    })?;

    #[cfg(windows)]
    tokio::fs::symlink_file(target, link).await.with_context(|| {
        format!(
            "Failed to create file symlink: {} -> {}",
            link.display(),
            target.display()
        )
    })?;

    #[cfg(not(any(unix, windows)))]
    bail!("Symlinks not supported on this platform");

    Ok(())
}

/// Remove `link` if it is a symlink; refuse anything else
async fn remove_symlink(link: &Path) -> Result<()> {
    match tokio::fs::symlink_metadata(link).await {
        Ok(metadata) if metadata.file_type().is_symlink() => tokio::fs::remove_file(link)
            .await
            .with_context(|| format!("Failed to remove symlink: {}", link.display())),
        Ok(_) => bail!("{} is not a symlink, leaving it alone", link.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to inspect {}", link.display())),
    }
}

#[derive(Debug, Default)]
pub struct SymlinkProvider;

impl SymlinkProvider {
    async fn ensure(candidate: &Entry, ctx: &StepContext) -> Result<Value> {
        let params: Params = params(candidate)?;
        let target = dependency_path(ctx, file::TYPE, &params.file)?;
        let link = params.link;

        match check_current(&link, &target).await? {
            LinkState::Correct => log::debug!("{} already points at {}", link.display(), target.display()),
            LinkState::Missing => create_symlink(&link, &target).await?,
            LinkState::WrongTarget(actual) => {
                log::debug!("Relinking {} (was {})", link.display(), actual.display());
                remove_symlink(&link).await?;
                create_symlink(&link, &target).await?;
            }
            LinkState::FileExists => {
                bail!("Refusing to overwrite existing file: {}", link.display())
            }
        }
        Ok(json!({ "link": link, "target": target }))
    }
}

#[async_trait]
impl Handler for SymlinkProvider {
    fn can_update_in_place(&self, candidate: &Entry, current: &Entry) -> bool {
        candidate.parameters.get("link") == current.parameters.get("link")
    }

    async fn create(&self, candidate: &Entry, ctx: &StepContext) -> Result<Value> {
        Self::ensure(candidate, ctx).await
    }

    async fn update(&self, candidate: &Entry, _current: &Entry, ctx: &StepContext) -> Result<Value> {
        Self::ensure(candidate, ctx).await
    }

    /// Remove the old link, then create the new one
    async fn replace(&self, candidate: &Entry, current: &Entry, ctx: &StepContext) -> Result<Value> {
        if let Some(old) = result_field(current.result.as_ref(), "link") {
            remove_symlink(&old).await?;
        }
        Self::ensure(candidate, ctx).await
    }

    async fn delete(&self, current: &Entry, _ctx: &StepContext) -> Result<()> {
        match result_field(current.result.as_ref(), "link") {
            Some(link) => remove_symlink(&link).await,
            None => Ok(()),
        }
    }
}

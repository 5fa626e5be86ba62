use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{DeployError, Result};
use crate::models::{RunAs, ServiceDefinition, Slot};
use crate::services::git;

/// Placeholder in a pre-start hook replaced by the slot name.
pub const SLOT_PLACEHOLDER: &str = "%i";

/// Brings a slot's source tree to the requested commit and runs its hook.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn prepare(&self, service: &ServiceDefinition, slot: Slot, commit_sha: &str)
        -> Result<()>;
}

#[derive(Debug, Default)]
pub struct GitWorkspace;

impl GitWorkspace {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    async fn prepare(
        &self,
        service: &ServiceDefinition,
        slot: Slot,
        commit_sha: &str,
    ) -> Result<()> {
        let dir = service.slot_directory(slot);

        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tracing::info!(service = %service.name, %slot, dir = %dir.display(), "updating workspace");
            git::pull_fast_forward(&dir).await?;
        } else {
            if let Some(parent) = dir.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DeployError::Sync(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
            tracing::info!(service = %service.name, %slot, dir = %dir.display(), "cloning workspace");
            git::clone_branch(&service.repository_url, &service.branch, &dir).await?;
        }

        match git::head_commit(&dir).await {
            Ok(head) if !head.starts_with(commit_sha) => {
                tracing::warn!(
                    service = %service.name,
                    %slot,
                    requested = commit_sha,
                    %head,
                    "workspace HEAD differs from pushed commit"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(service = %service.name, %slot, "could not read HEAD: {e}"),
        }

        if !service.run_as.is_empty() {
            set_owner(&dir, &service.run_as).await?;
        }

        run_pre_start_hook(&service.pre_start_hook, slot, &dir).await
    }
}

/// Split a hook template into program and arguments, substituting the slot.
///
/// A relative program path is resolved against the slot directory.
pub fn expand_hook(template: &str, slot: Slot, slot_dir: &Path) -> Option<(PathBuf, Vec<String>)> {
    let expanded = template.replace(SLOT_PLACEHOLDER, slot.as_str());
    let mut words = expanded.split_whitespace();
    let program = words.next()?;
    let args = words.map(str::to_string).collect();
    Some((slot_dir.join(program), args))
}

/// Run the hook with the slot directory as working directory, sharing our
/// stdout/stderr. An empty template is a no-op.
pub async fn run_pre_start_hook(template: &str, slot: Slot, slot_dir: &Path) -> Result<()> {
    let Some((program, args)) = expand_hook(template, slot, slot_dir) else {
        return Ok(());
    };

    tracing::info!(%slot, hook = %program.display(), "running pre-start hook");
    let status = Command::new(&program)
        .args(&args)
        .current_dir(slot_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| DeployError::Hook(format!("failed to launch {}: {e}", program.display())))?;

    if !status.success() {
        return Err(DeployError::Hook(format!(
            "{} exited with {}",
            program.display(),
            status.code().map_or("signal".to_string(), |c| c.to_string())
        )));
    }
    Ok(())
}

async fn set_owner(dir: &Path, run_as: &RunAs) -> Result<()> {
    let owner = run_as.owner_spec();
    let output = Command::new("chown")
        .arg("-R")
        .arg(&owner)
        .arg(dir)
        .output()
        .await
        .map_err(|e| DeployError::Sync(format!("failed to run chown: {e}")))?;
    if !output.status.success() {
        return Err(DeployError::Sync(format!(
            "chown {owner} {} failed: {}",
            dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

use std::path::Path;

use tokio::process::Command;

use crate::error::{DeployError, Result};

async fn run_git(args: &[&str], working_directory: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = working_directory {
        cmd.current_dir(dir);
    }
    // Never block on a credential prompt inside the daemon.
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    let output = cmd
        .output()
        .await
        .map_err(|e| DeployError::Sync(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DeployError::Sync(format!(
            "git {} failed (exit {}): {}",
            args.join(" "),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Fresh checkout of a single branch into `target_path`.
pub async fn clone_branch(source: &str, branch: &str, target_path: &Path) -> Result<()> {
    let target = target_path.to_string_lossy();
    run_git(&["clone", "--branch", branch, source, &target], None).await?;
    Ok(())
}

/// Fast-forward the checked-out branch; refuses to create merge commits.
pub async fn pull_fast_forward(repo_path: &Path) -> Result<()> {
    run_git(&["pull", "--ff-only"], Some(repo_path)).await?;
    Ok(())
}

pub async fn head_commit(repo_path: &Path) -> Result<String> {
    run_git(&["rev-parse", "HEAD"], Some(repo_path)).await
}

//! Commits build output back to the source repository
//!
//! The push made here triggers another delivery for the same repository.
//! That delivery runs the build again, and the cycle only ends if the second
//! run leaves the committed path untouched. With `verify_idempotent` the
//! build is re-run before committing and any drift refuses the commit.

use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::build::run_build;
use crate::error::CommitError;
use crate::git::{self, CommitIdentity, RepoTarget};

#[derive(Debug, Clone)]
pub struct CommitPlan<'a> {
    /// Pathspec that gets staged; changes elsewhere in the tree are ignored.
    pub path: &'a str,
    pub message: &'a str,
    pub branch: &'a str,
    pub identity: CommitIdentity,
    /// Build command to re-run as an idempotence check before committing.
    pub verify_with: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "result")]
pub enum CommitOutcome {
    /// Nothing changed under the committed path.
    Clean,
    Pushed {
        commit: String,
        branch: String,
        paths: Vec<String>,
    },
}

/// Stage, commit and push whatever the build changed under `plan.path`.
///
/// On a refused or failed commit/push the tree is reset to the synced
/// commit so a later delivery reusing the directory can still fast-forward.
pub async fn commit_build_output(
    target: &RepoTarget,
    dir: &Path,
    plan: &CommitPlan<'_>,
) -> Result<CommitOutcome, CommitError> {
    let changed = git::status(dir, Some(plan.path)).await?;
    if changed.is_empty() {
        info!("Build left {} clean, nothing to commit", plan.path);
        return Ok(CommitOutcome::Clean);
    }
    let paths: Vec<String> = changed.into_iter().map(|e| e.path).collect();
    info!("Build changed {} path(s) under {}", paths.len(), plan.path);

    let synced_head = git::head(dir).await?;
    let result = stage_commit_push(target, dir, plan).await;
    match result {
        Ok(commit) => Ok(CommitOutcome::Pushed {
            commit,
            branch: plan.branch.to_string(),
            paths,
        }),
        Err(e) => {
            warn!("Commit-back failed, resetting tree to {}: {}", synced_head, e);
            if let Err(reset_err) = git::discard_changes(dir, &synced_head, plan.path).await {
                warn!("Reset after failed commit-back also failed: {}", reset_err);
            }
            Err(e)
        }
    }
}

async fn stage_commit_push(
    target: &RepoTarget,
    dir: &Path,
    plan: &CommitPlan<'_>,
) -> Result<String, CommitError> {
    git::configure_identity(dir, &plan.identity).await?;
    git::stage(dir, plan.path).await?;

    if let Some(command) = plan.verify_with {
        info!("Re-running build to confirm it is idempotent");
        run_build(command, dir).await?;
        let drift: Vec<String> = git::status(dir, Some(plan.path))
            .await?
            .into_iter()
            .filter(|e| e.is_unstaged())
            .map(|e| e.path)
            .collect();
        if !drift.is_empty() {
            return Err(CommitError::NonIdempotentBuild(drift));
        }
    }

    let commit = git::commit(dir, plan.message).await?;
    git::push(target, dir, plan.branch).await?;
    info!("Pushed {} to {}", commit, plan.branch);
    Ok(commit)
}

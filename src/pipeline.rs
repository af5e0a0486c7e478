//! Publish reconciliation for one push delivery
//!
//! Order of work:
//! 1. diff set from the commit list
//! 2. workspace lease, then clone/pull (fatal on failure)
//! 3. upload staging (files copied aside before the build can touch the tree)
//! 4. concurrently: uploads, batch delete, cache invalidation, build + commit-back
//! 5. one aggregated [`PublishReport`]

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::build::{BuildOutput, run_build};
use crate::cdn::invalidate_all;
use crate::committer::{CommitOutcome, CommitPlan, commit_build_output};
use crate::config::{BuildSettings, PublishConfig};
use crate::diff::{FileChangeSet, extract_changes};
use crate::error::{BuildError, PublishError, Result};
use crate::git::{self, CommitIdentity, RepoTarget, SyncOutcome};
use crate::publisher::{delete_all, discard_snapshot, stage_uploads, upload_all};
use crate::storage::{CdnInvalidator, InvalidationAck, ObjectStore};
use crate::webhook::PushPayload;
use crate::workspace::WorkspaceLeases;

pub const DEFAULT_COMMIT_EMAIL: &str = "bot@user.com";
pub const DEFAULT_COMMIT_NAME: &str = "Bot user";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Upload,
    Delete,
    Invalidate,
    Build,
    Commit,
}

/// A step that failed without aborting the delivery
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepFailure {
    pub step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub message: String,
}

impl StepFailure {
    fn new(step: Step, key: Option<String>, err: impl std::fmt::Display) -> Self {
        Self {
            step,
            key,
            message: err.to_string(),
        }
    }
}

/// Aggregated outcome of a delivery; serialized as the webhook response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub delivery_id: String,
    pub repository: String,
    pub branch: String,
    pub head_commit: Option<String>,
    pub working_directory: String,
    pub sync: &'static str,
    pub dry_run: bool,
    /// Objects actually written; skipped and failed keys are not counted.
    pub upload: usize,
    /// Deletions acknowledged by the store. After a failed delete this holds
    /// what earlier chunks removed, or `None` when nothing was confirmed.
    pub delete: Option<usize>,
    #[serde(rename = "cloudFront")]
    pub cloud_front: Option<InvalidationAck>,
    pub cmd_output: Option<String>,
    pub cmd_exit_code: Option<i32>,
    /// Set when `cmd_output` was cut at the capture limit.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cmd_output_truncated: bool,
    pub commit: Option<CommitOutcome>,
    pub changes: FileChangeSet,
    pub skipped: Vec<String>,
    pub failures: Vec<StepFailure>,
}

impl PublishReport {
    /// True when nothing but (at most) the cache invalidation failed.
    pub fn is_complete(&self) -> bool {
        self.failures.iter().all(|f| f.step == Step::Invalidate)
    }
}

struct BuildBranch {
    output: Option<BuildOutput>,
    commit: Option<CommitOutcome>,
    failure: Option<StepFailure>,
}

pub struct Pipeline {
    config: Arc<PublishConfig>,
    store: Arc<dyn ObjectStore>,
    cdn: Option<Arc<dyn CdnInvalidator>>,
    leases: WorkspaceLeases,
}

impl Pipeline {
    pub fn new(
        config: Arc<PublishConfig>,
        store: Arc<dyn ObjectStore>,
        cdn: Option<Arc<dyn CdnInvalidator>>,
    ) -> Self {
        let leases = WorkspaceLeases::new(config.work_root.clone());
        Self {
            config,
            store,
            cdn,
            leases,
        }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// Repository addressed by this delivery: configured name first, then the payload's.
    pub fn repository_for<'a>(&'a self, payload: &'a PushPayload) -> Option<&'a str> {
        self.config
            .repository
            .full_name
            .as_deref()
            .or_else(|| payload.repository.as_ref().map(|r| r.full_name.as_str()))
    }

    /// Run the whole reconciliation for one delivery.
    ///
    /// Only payload and sync problems are returned as `Err`; every later step
    /// reports into the returned [`PublishReport`].
    pub async fn run(
        &self,
        delivery_id: &str,
        payload: &PushPayload,
        dry_run: bool,
    ) -> Result<PublishReport> {
        let config = self.config.as_ref();
        let full_name = self.repository_for(payload).ok_or_else(|| {
            PublishError::InvalidPayload("missing repository.full_name".to_string())
        })?;
        let branch = payload
            .branch()
            .or(config.repository.branch.as_deref())
            .ok_or_else(|| PublishError::InvalidPayload("ref is not a branch".to_string()))?;
        let prefix = config.prefix();

        let changes = extract_changes(&payload.commits, prefix);
        info!(
            delivery_id,
            repo = full_name,
            branch,
            to_upload = changes.to_upload.len(),
            to_delete = changes.to_delete.len(),
            "Computed diff set"
        );
        if changes.is_empty() {
            info!(delivery_id, "No paths under the prefix changed");
        }
        for path in changes.conflicts() {
            warn!("{} is both uploaded and deleted in this delivery", path);
        }

        let revision = payload.head_commit().unwrap_or(delivery_id);
        let dir = self.leases.directory_for(full_name, revision);

        let _lease = self.leases.acquire(full_name).await;
        let target = RepoTarget::new(&config.repository, full_name, branch);
        let sync = git::sync_working_tree(&target, &dir)
            .await
            .map_err(PublishError::Sync)?;
        info!(delivery_id, "Working tree {:?} at {}", sync, dir.display());

        let mut report = PublishReport {
            delivery_id: delivery_id.to_string(),
            repository: full_name.to_string(),
            branch: branch.to_string(),
            head_commit: payload.head_commit().map(String::from),
            working_directory: dir.display().to_string(),
            sync: match sync {
                SyncOutcome::Cloned => "cloned",
                SyncOutcome::Pulled => "pulled",
            },
            dry_run,
            upload: 0,
            delete: Some(0),
            cloud_front: None,
            cmd_output: None,
            cmd_exit_code: None,
            cmd_output_truncated: false,
            commit: None,
            changes,
            skipped: Vec::new(),
            failures: Vec::new(),
        };

        if dry_run {
            info!(delivery_id, "[DRY_RUN] Skipping storage, CDN and build");
            report.delete = None;
            return Ok(report);
        }

        let snapshot = dir.with_file_name(format!(".upload-{}", Uuid::now_v7()));
        let staged = stage_uploads(&dir, prefix, &report.changes.to_upload, &snapshot).await;
        report.skipped = staged.skipped;
        report.failures.extend(
            staged
                .failures
                .into_iter()
                .map(|(key, e)| StepFailure::new(Step::Upload, Some(key), e)),
        );

        let (uploads, deleted, invalidation, build) = tokio::join!(
            upload_all(
                self.store.as_ref(),
                staged.objects,
                &config.storage.acl,
                config.max_concurrent_uploads,
            ),
            delete_all(self.store.as_ref(), &report.changes.to_delete),
            self.invalidate(),
            self.build_and_commit(&target, &dir, payload),
        );
        discard_snapshot(&snapshot).await;

        report.upload = uploads.uploaded;
        report.failures.extend(
            uploads
                .failures
                .into_iter()
                .map(|(key, e)| StepFailure::new(Step::Upload, Some(key), e)),
        );

        match deleted {
            Ok(count) => report.delete = Some(count),
            Err(e) => {
                warn!(delivery_id, "Batch delete failed: {}", e);
                report.delete = Some(e.acknowledged()).filter(|n| *n > 0);
                report.failures.push(StepFailure::new(Step::Delete, None, e));
            }
        }

        match invalidation {
            Some(Ok(ack)) => report.cloud_front = Some(ack),
            Some(Err(e)) => {
                warn!(delivery_id, "Cache invalidation failed: {}", e);
                report.failures.push(StepFailure::new(Step::Invalidate, None, e));
            }
            None => {}
        }

        if let Some(build) = build {
            if let Some(output) = build.output {
                report.cmd_output = Some(output.output);
                report.cmd_exit_code = output.exit_code;
                report.cmd_output_truncated = output.output_truncated;
            }
            report.commit = build.commit;
            report.failures.extend(build.failure);
        }

        info!(
            delivery_id,
            upload = report.upload,
            delete = ?report.delete,
            failures = report.failures.len(),
            "Delivery processed"
        );
        Ok(report)
    }

    async fn invalidate(&self) -> Option<std::result::Result<InvalidationAck, crate::error::CdnError>> {
        let settings = self.config.cdn.as_ref()?;
        let cdn = self.cdn.as_ref()?;
        Some(invalidate_all(cdn.as_ref(), &settings.distribution_id).await)
    }

    async fn build_and_commit(
        &self,
        target: &RepoTarget,
        dir: &Path,
        payload: &PushPayload,
    ) -> Option<BuildBranch> {
        let build = self.config.build.as_ref()?;

        let output = match run_build(&build.command, dir).await {
            Ok(output) => output,
            Err(e) => {
                let output = match &e {
                    BuildError::NonZeroExit(output) => Some(output.clone()),
                    BuildError::Spawn(_) => None,
                };
                return Some(BuildBranch {
                    output,
                    commit: None,
                    failure: Some(StepFailure::new(Step::Build, None, e)),
                });
            }
        };

        let plan = CommitPlan {
            path: build.commit_path(self.config.prefix()),
            message: &build.commit_message,
            branch: build.commit_branch.as_deref().unwrap_or(&target.branch),
            identity: commit_identity(build, payload),
            verify_with: build.verify_idempotent.then_some(build.command.as_str()),
        };

        let (commit, failure) = match commit_build_output(target, dir, &plan).await {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => {
                warn!("Commit-back failed: {}", e);
                (None, Some(StepFailure::new(Step::Commit, None, e)))
            }
        };

        Some(BuildBranch {
            output: Some(output),
            commit,
            failure,
        })
    }
}

/// Configured identity, else the repository owner from the payload, else the bot defaults.
fn commit_identity(build: &BuildSettings, payload: &PushPayload) -> CommitIdentity {
    let owner = payload.owner();
    CommitIdentity {
        email: build
            .user_email
            .clone()
            .or_else(|| owner.and_then(|o| o.email.clone()))
            .unwrap_or_else(|| DEFAULT_COMMIT_EMAIL.to_string()),
        name: build
            .user_name
            .clone()
            .or_else(|| owner.and_then(|o| o.name.clone().or_else(|| o.login.clone())))
            .unwrap_or_else(|| DEFAULT_COMMIT_NAME.to_string()),
    }
}

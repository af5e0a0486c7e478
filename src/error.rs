use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::io;

use crate::build::BuildOutput;

/// Configuration problems detected once at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read { path: String, source: io::Error },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("No webhook secret configured (set webhook.secret or GITHUB_WEBHOOK_SECRET)")]
    MissingWebhookSecret,

    #[error("No storage bucket configured (set storage.bucket or AWS_S3_BUCKET)")]
    MissingBucket,

    #[error("max_concurrent_uploads must be at least 1")]
    ZeroConcurrency,

    #[error("build.command is set but empty")]
    EmptyBuildCommand,

    #[error("Invalid path prefix '{0}': must not start or end with '/'")]
    InvalidPrefix(String),
}

/// Errors that may be returned by the git wrapper
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Git operation failed: {operation}\n{message}")]
    OperationFailed { operation: String, message: String },

    #[error("Push rejected: {0}")]
    PushRejected(String),

    #[error("Failed to start git: {0}")]
    Spawn(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Build command failed to start: {0}")]
    Spawn(#[source] io::Error),

    #[error("Build command exited with {:?}:\n{}", .0.exit_code, .0.output)]
    NonZeroExit(BuildOutput),
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Second build pass changed {0:?}; refusing to commit output that would retrigger itself")]
    NonIdempotentBuild(Vec<String>),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to read '{path}': {source}")]
    Read { path: String, source: io::Error },

    #[error("Upload of '{key}' failed: {message}")]
    Put { key: String, message: String },

    #[error("Batch delete failed after {acknowledged} deletion(s): {message}")]
    Delete { acknowledged: usize, message: String },

    #[error("Listing objects failed: {0}")]
    List(String),
}

#[derive(Debug, thiserror::Error)]
#[error("Invalidation of distribution '{distribution_id}' failed: {message}")]
pub struct CdnError {
    pub distribution_id: String,
    pub message: String,
}

impl StorageError {
    /// Deletions the store confirmed before a batch delete failed.
    pub fn acknowledged(&self) -> usize {
        match self {
            StorageError::Delete { acknowledged, .. } => *acknowledged,
            _ => 0,
        }
    }
}

/// Fatal pipeline errors; anything here aborts the delivery
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Invalid push payload: {0}")]
    InvalidPayload(String),

    #[error("Working tree sync failed: {0}")]
    Sync(#[source] GitError),
}

impl IntoResponse for PublishError {
    fn into_response(self) -> Response {
        let status = match &self {
            PublishError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Helper type for Results that use PublishError
pub type Result<T> = std::result::Result<T, PublishError>;

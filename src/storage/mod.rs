//! Object storage and CDN seams
//!
//! The pipeline only talks to these traits. [`aws`] backs them with S3 and
//! CloudFront, [`memory`] keeps everything in-process for tests and dry runs.

pub mod aws;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{CdnError, StorageError};

pub use self::aws::{CloudFrontInvalidator, S3Store};
pub use self::memory::{MemoryCdn, MemoryStore};

/// Generic fallback when the extension gives no content type
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// S3 rejects DeleteObjects requests with more keys than this
pub const MAX_DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub acl: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub size: i64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket this store writes to.
    fn bucket(&self) -> &str;

    async fn put_object(&self, request: PutRequest) -> Result<(), StorageError>;

    /// Delete `keys` (at most [`MAX_DELETE_BATCH`]) in one request; returns how
    /// many deletions the store acknowledged.
    async fn delete_objects(&self, keys: &[String]) -> Result<usize, StorageError>;

    /// Every object in the bucket, following pagination to the end.
    async fn list_objects(&self) -> Result<Vec<ObjectSummary>, StorageError>;
}

/// What the CDN returned for an invalidation request
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationAck {
    pub id: String,
    pub status: String,
    pub caller_reference: String,
}

#[async_trait]
pub trait CdnInvalidator: Send + Sync {
    async fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> Result<InvalidationAck, CdnError>;
}

/// Content type for `key` from its extension, falling back to [`DEFAULT_CONTENT_TYPE`].
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

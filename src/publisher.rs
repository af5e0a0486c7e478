//! Uploads and deletes against the object store
//!
//! Uploads are staged first: every changed file is copied out of the
//! synchronized tree into a snapshot directory before any upload starts, so a
//! build running concurrently on the same tree cannot change what gets
//! published. Bodies are read from the snapshot inside the upload fan-out, so
//! at most `concurrency` files are held in memory at once.

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::storage::{MAX_DELETE_BATCH, ObjectStore, PutRequest, content_type_for};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    pub key: String,
    /// Snapshot copy the body is read from at upload time.
    pub path: PathBuf,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct StagedUploads {
    pub objects: Vec<StagedObject>,
    /// Keys with no file in the tree; not an error.
    pub skipped: Vec<String>,
    pub failures: Vec<(String, StorageError)>,
}

#[derive(Debug, Default)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub failures: Vec<(String, StorageError)>,
}

/// Local path for `key`: `<root>/<prefix>/<key>`. `None` for keys that would
/// escape the tree.
pub fn local_path(root: &Path, prefix: Option<&str>, key: &str) -> Option<PathBuf> {
    let relative = Path::new(key);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe || key.is_empty() {
        return None;
    }
    let mut path = root.to_path_buf();
    if let Some(p) = prefix.filter(|p| !p.is_empty()) {
        path.push(p);
    }
    path.push(relative);
    Some(path)
}

/// Copy every upload candidate from the tree into `snapshot`.
pub async fn stage_uploads(
    root: &Path,
    prefix: Option<&str>,
    keys: &BTreeSet<String>,
    snapshot: &Path,
) -> StagedUploads {
    let mut staged = StagedUploads::default();
    for key in keys {
        let Some(source) = local_path(root, prefix, key) else {
            warn!("Refusing to publish path outside the tree: {}", key);
            staged.skipped.push(key.clone());
            continue;
        };
        // keys that pass local_path are relative and free of `..`
        let target = snapshot.join(key);
        match copy_into_snapshot(&source, &target).await {
            Ok(size) => {
                info!("Staged {} ({} bytes)", source.display(), size);
                staged.objects.push(StagedObject {
                    key: key.clone(),
                    path: target,
                    content_type: content_type_for(key),
                    size,
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("File not found {}", source.display());
                staged.skipped.push(key.clone());
            }
            Err(source_err) => {
                warn!("Could not stage {}: {}", source.display(), source_err);
                staged.failures.push((
                    key.clone(),
                    StorageError::Read {
                        path: source.display().to_string(),
                        source: source_err,
                    },
                ));
            }
        }
    }
    staged
}

async fn copy_into_snapshot(source: &Path, target: &Path) -> std::io::Result<u64> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, target).await
}

/// Remove a snapshot directory once its uploads have settled.
pub async fn discard_snapshot(snapshot: &Path) {
    match tokio::fs::remove_dir_all(snapshot).await {
        Ok(()) => debug!("Removed upload snapshot {}", snapshot.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove upload snapshot {}: {}", snapshot.display(), e),
    }
}

/// Upload every staged object with at most `concurrency` requests in flight.
///
/// A failed key never cancels its siblings; every outcome is collected and
/// only successful writes are counted.
pub async fn upload_all(
    store: &dyn ObjectStore,
    objects: Vec<StagedObject>,
    acl: &str,
    concurrency: usize,
) -> UploadSummary {
    let bucket = store.bucket().to_string();
    let results: Vec<Result<String, (String, StorageError)>> = stream::iter(objects)
        .map(|object| {
            let bucket = &bucket;
            async move {
                let key = object.key;
                let body = match tokio::fs::read(&object.path).await {
                    Ok(body) => body,
                    Err(source) => {
                        let path = object.path.display().to_string();
                        return Err((key, StorageError::Read { path, source }));
                    }
                };
                info!("Uploading {} {} to {}", key, object.size, bucket);
                store
                    .put_object(PutRequest {
                        key: key.clone(),
                        body,
                        content_type: object.content_type,
                        acl: acl.to_string(),
                    })
                    .await
                    .map(|_| key.clone())
                    .map_err(|e| (key, e))
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut summary = UploadSummary::default();
    for result in results {
        match result {
            Ok(_) => summary.uploaded += 1,
            Err((key, e)) => {
                warn!("Upload of {} failed: {}", key, e);
                summary.failures.push((key, e));
            }
        }
    }
    summary
}

/// Delete `keys` in as few batch requests as the store allows. An empty set
/// makes no request.
///
/// Batches run one after another and stop at the first failure; the error
/// carries the deletions earlier batches already confirmed.
pub async fn delete_all(
    store: &dyn ObjectStore,
    keys: &BTreeSet<String>,
) -> Result<usize, StorageError> {
    if keys.is_empty() {
        return Ok(0);
    }
    let keys: Vec<String> = keys.iter().cloned().collect();
    info!("Deleting {} key(s) from {}", keys.len(), store.bucket());

    let mut acknowledged = 0;
    for batch in keys.chunks(MAX_DELETE_BATCH) {
        debug!("Deleting {:?}", batch);
        match store.delete_objects(batch).await {
            Ok(count) => acknowledged += count,
            Err(StorageError::Delete {
                acknowledged: partial,
                message,
            }) => {
                return Err(StorageError::Delete {
                    acknowledged: acknowledged + partial,
                    message,
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(acknowledged)
}

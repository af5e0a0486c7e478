//! In-process store and CDN with failure injection

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{CdnInvalidator, InvalidationAck, ObjectStore, ObjectSummary, PutRequest};
use crate::error::{CdnError, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub acl: String,
}

#[derive(Default)]
pub struct MemoryStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing_keys: Mutex<HashSet<String>>,
    /// Batches still allowed to succeed before deletes start failing.
    delete_budget: Mutex<Option<usize>>,
    delete_batches: Mutex<Vec<Vec<String>>>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Make every upload of `key` fail.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.failing_keys.lock().unwrap().insert(key.into());
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes_after(0);
    }

    /// Let `batches` delete requests succeed, then fail every later one.
    pub fn fail_deletes_after(&self, batches: usize) {
        *self.delete_budget.lock().unwrap() = Some(batches);
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(
            key.into(),
            StoredObject {
                body: body.into(),
                content_type: super::DEFAULT_CONTENT_TYPE.to_string(),
                acl: "private".to_string(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Every batch passed to `delete_objects`, in call order.
    pub fn delete_batches(&self) -> Vec<Vec<String>> {
        self.delete_batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, request: PutRequest) -> Result<(), StorageError> {
        if self.failing_keys.lock().unwrap().contains(&request.key) {
            return Err(StorageError::Put {
                key: request.key,
                message: "injected failure".to_string(),
            });
        }
        self.objects.lock().unwrap().insert(
            request.key,
            StoredObject {
                body: request.body,
                content_type: request.content_type,
                acl: request.acl,
            },
        );
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<usize, StorageError> {
        self.delete_batches.lock().unwrap().push(keys.to_vec());
        match self.delete_budget.lock().unwrap().as_mut() {
            Some(0) => {
                return Err(StorageError::Delete {
                    acknowledged: 0,
                    message: "injected failure".to_string(),
                });
            }
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        // S3 acknowledges keys that were already absent, so do we
        Ok(keys.len())
    }

    async fn list_objects(&self) -> Result<Vec<ObjectSummary>, StorageError> {
        let now = Utc::now();
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(key, obj)| ObjectSummary {
                key: key.clone(),
                last_modified: Some(now),
                etag: None,
                size: obj.body.len() as i64,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryCdn {
    requests: Mutex<Vec<(String, Vec<String>, String)>>,
    fail: AtomicBool,
}

impl MemoryCdn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_requests(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// `(distribution_id, paths, caller_reference)` for every request received.
    pub fn requests(&self) -> Vec<(String, Vec<String>, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CdnInvalidator for MemoryCdn {
    async fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> Result<InvalidationAck, CdnError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push((
            distribution_id.to_string(),
            paths.to_vec(),
            caller_reference.to_string(),
        ));
        if self.fail.load(Ordering::SeqCst) {
            return Err(CdnError {
                distribution_id: distribution_id.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(InvalidationAck {
            id: format!("I{}", requests.len()),
            status: "InProgress".to_string(),
            caller_reference: caller_reference.to_string(),
        })
    }
}

//! S3 and CloudFront backed implementations

use async_trait::async_trait;
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectCannedAcl, ObjectIdentifier};
use chrono::DateTime;
use tracing::{info, warn};

use super::{CdnInvalidator, InvalidationAck, ObjectStore, ObjectSummary, PutRequest};
use crate::error::{CdnError, StorageError};

/// Load shared AWS configuration (credentials chain + the configured region).
pub async fn load_sdk_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(sdk_config: &aws_config::SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(sdk_config),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, request: PutRequest) -> Result<(), StorageError> {
        let PutRequest {
            key,
            body,
            content_type,
            acl,
        } = request;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .acl(ObjectCannedAcl::from(acl.as_str()))
            .send()
            .await
            .map_err(|e| StorageError::Put {
                key,
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<usize, StorageError> {
        let failed = |message: String| StorageError::Delete {
            acknowledged: 0,
            message,
        };
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| failed(e.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(|e| failed(e.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| failed(DisplayErrorContext(&e).to_string()))?;

        for err in output.errors() {
            warn!(
                "S3 refused to delete {:?}: {:?}",
                err.key(),
                err.message()
            );
        }
        Ok(output.deleted().len())
    }

    async fn list_objects(&self) -> Result<Vec<ObjectSummary>, StorageError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();

        let mut results = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StorageError::List(DisplayErrorContext(&e).to_string()))?;
            for object in page.contents() {
                results.push(ObjectSummary {
                    key: object.key().unwrap_or_default().to_string(),
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                    etag: object.e_tag().map(String::from),
                    size: object.size().unwrap_or_default(),
                });
            }
        }
        info!("Listed {} objects in {}", results.len(), self.bucket);
        Ok(results)
    }
}

pub struct CloudFrontInvalidator {
    client: aws_sdk_cloudfront::Client,
}

impl CloudFrontInvalidator {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudfront::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl CdnInvalidator for CloudFrontInvalidator {
    async fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> Result<InvalidationAck, CdnError> {
        let fail = |message: String| CdnError {
            distribution_id: distribution_id.to_string(),
            message,
        };

        let paths = Paths::builder()
            .quantity(paths.len() as i32)
            .set_items(Some(paths.to_vec()))
            .build()
            .map_err(|e| fail(e.to_string()))?;
        let batch = InvalidationBatch::builder()
            .paths(paths)
            .caller_reference(caller_reference)
            .build()
            .map_err(|e| fail(e.to_string()))?;

        let output = self
            .client
            .create_invalidation()
            .distribution_id(distribution_id)
            .invalidation_batch(batch)
            .send()
            .await
            .map_err(|e| fail(DisplayErrorContext(&e).to_string()))?;

        let invalidation = output.invalidation();
        Ok(InvalidationAck {
            id: invalidation.map(|i| i.id().to_string()).unwrap_or_default(),
            status: invalidation
                .map(|i| i.status().to_string())
                .unwrap_or_default(),
            caller_reference: caller_reference.to_string(),
        })
    }
}

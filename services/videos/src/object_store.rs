use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{AccessControlPolicy, Grant, Grantee, Permission, Type};
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Canned S3 group standing for anonymous readers
const ALL_USERS_GROUP_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// Errors raised by the object store
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Local file error: {0}")]
    LocalFile(#[from] std::io::Error),

    #[error("Object store request failed for {key}: {message}")]
    Client { key: String, message: String },

    #[error("Access control update failed for {key}: {message}")]
    AccessControl { key: String, message: String },
}

/// Bucket-scoped object storage used for guide videos and json files
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`
    async fn put_file(&self, key: &str, path: &Path, content_type: &str)
        -> Result<(), ObjectStoreError>;

    /// Delete the object stored under `key`
    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Add an anonymous read grant to the object's ACL
    async fn grant_public_read(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Public URL under which `key` is served
    fn public_url(&self, key: &str) -> String;
}

/// S3-compatible object store (AWS, NCloud, MinIO)
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3ObjectStore {
    /// Create a new store; credentials come from the default provider chain
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, path), fields(bucket = %self.bucket))]
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| ObjectStoreError::LocalFile(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Client {
                key: key.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        debug!(key = %key, "Object uploaded");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Client {
                key: key.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        debug!(key = %key, "Object deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn grant_public_read(&self, key: &str) -> Result<(), ObjectStoreError> {
        let acl_error = |message: String| ObjectStoreError::AccessControl {
            key: key.to_string(),
            message,
        };

        let current = self
            .client
            .get_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| acl_error(DisplayErrorContext(e).to_string()))?;

        let all_users = Grantee::builder()
            .r#type(Type::Group)
            .uri(ALL_USERS_GROUP_URI)
            .build()
            .map_err(|e| acl_error(e.to_string()))?;

        let mut grants = current.grants().to_vec();
        grants.push(
            Grant::builder()
                .grantee(all_users)
                .permission(Permission::Read)
                .build(),
        );

        let policy = AccessControlPolicy::builder()
            .set_grants(Some(grants))
            .set_owner(current.owner().cloned())
            .build();

        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .access_control_policy(policy)
            .send()
            .await
            .map_err(|e| acl_error(DisplayErrorContext(e).to_string()))?;

        debug!(key = %key, "Public read granted");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_object_url(&self.public_base_url, &self.bucket, key)
    }
}

/// `{base}/{bucket}/{key}`, tolerating a trailing slash on the base
pub fn public_object_url(base_url: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), bucket, key)
}

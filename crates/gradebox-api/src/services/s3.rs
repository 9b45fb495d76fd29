//! S3-compatible object storage for source archives.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use gradebox_config::StorageConfig;
use gradebox_core::storage::ObjectStore;
use gradebox_core::{Error, Result};
use std::time::Duration;
use tracing::debug;

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Client from the default AWS credential chain, with the configured
    /// region and endpoint applied on top.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();
        Self::new(Client::from_conf(s3_config), config.bucket.clone())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(&self, key: &str, data: Bytes) -> Result<()> {
        debug!(bucket = %self.bucket, key = %key, "Uploading object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type("application/zip")
            .send()
            .await
            .map_err(|e| Error::Storage(format!("upload {}: {}", key, DisplayErrorContext(e))))?;
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let presigning =
            PresigningConfig::expires_in(ttl).map_err(|e| Error::Storage(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| Error::Storage(format!("presign {}: {}", key, DisplayErrorContext(e))))?;
        Ok(request.uri().to_string())
    }
}

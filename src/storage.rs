use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;

use crate::config::StorageConfig;

/// Object store for uploaded tour and user images.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
}

/// MinIO (or any S3-compatible store) bucket holding the resized images.
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

async fn minio_sdk_config(cfg: &StorageConfig, region: &str) -> SdkConfig {
    let credentials = Credentials::new(
        &cfg.minio_access_key,
        &cfg.minio_secret_key,
        None,
        None,
        "tourbook-env",
    );
    defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(credentials)
        .endpoint_url(&cfg.minio_endpoint)
        .load()
        .await
}

impl Storage {
    pub async fn new(cfg: &StorageConfig, region: &str) -> anyhow::Result<Self> {
        let sdk = minio_sdk_config(cfg, region).await;
        // MinIO serves buckets by path, not by virtual host.
        let s3 = S3ConfigBuilder::from(&sdk)
            .endpoint_url(&cfg.minio_endpoint)
            .force_path_style(true)
            .build();
        Ok(Self {
            client: Client::from_conf(s3),
            bucket: cfg.minio_bucket.clone(),
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("upload {key} to bucket {}", self.bucket))?;
        tracing::debug!(%key, size, bucket = %self.bucket, "object stored");
        Ok(())
    }
}

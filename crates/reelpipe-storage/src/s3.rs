//! S3 (and S3-compatible) object store backend.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};

use crate::backend::{content_type_for, StorageBackend, PUBLIC_URL_TTL_SECS};
use crate::error::{StorageError, StorageResult};
use crate::paths::{PathResolver, PROCESSED_PREFIX, UPLOADS_PREFIX};

/// Configuration for the S3 backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// Bucket name
    pub bucket_name: String,
    /// Region
    pub region: String,
    /// Custom endpoint for S3-compatible stores (R2, MinIO)
    pub endpoint_url: Option<String>,
    /// Static access key ID; the default credential chain is used when unset
    pub access_key_id: Option<String>,
    /// Static secret access key
    pub secret_access_key: Option<String>,
    /// Key prefix for uploaded originals
    pub upload_prefix: String,
    /// Key prefix for processed artifacts
    pub processed_prefix: String,
}

impl S3Config {
    pub fn new(bucket_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            region: region.into(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            upload_prefix: UPLOADS_PREFIX.to_string(),
            processed_prefix: PROCESSED_PREFIX.to_string(),
        }
    }
}

/// Object store backend.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    resolver: PathResolver,
}

impl S3Storage {
    /// Create a client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.bucket_name.trim().is_empty() {
            return Err(StorageError::config_error("S3 bucket name is empty"));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => {
                loader = loader
                    .credentials_provider(Credentials::new(key, secret, None, None, "static"));
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::config_error(
                    "both access key id and secret access key must be set",
                ))
            }
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::from_client(
            Client::from_conf(builder.build()),
            config,
        ))
    }

    /// Wrap an existing SDK client.
    pub fn from_client(client: Client, config: S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket_name,
            resolver: PathResolver::new(config.upload_prefix, config.processed_prefix),
        }
    }

    /// Object key for a logical path.
    pub fn key_for(&self, logical: &str) -> String {
        self.resolver.resolve(logical)
    }

    async fn put_object(
        &self,
        key: &str,
        body: ByteStream,
        content_type: &str,
        metadata_key: &str,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .metadata(metadata_key, chrono::Utc::now().to_rfc3339())
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("key={}: {}", key, e)))?;
        Ok(())
    }

    async fn head(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(format!("head {}: {}", key, e)))
                }
            }
        }
    }

    /// Presign a GET for `key`, valid for `expires_in`.
    pub async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn save_file(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        dest: &str,
    ) -> StorageResult<()> {
        let key = self.key_for(dest);
        let (spool, size) = spool_to_disk(reader).await?;
        debug!("Uploading {} bytes to {}", size, key);

        let body = ByteStream::from_path(spool.path())
            .await
            .map_err(|e| StorageError::upload_failed(format!("key={}: {}", key, e)))?;
        self.put_object(&key, body, content_type_for(dest), "uploaded-at")
            .await?;
        info!("Saved {}", key);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> StorageResult<()> {
        let key = self.key_for(path);
        // S3 reports success for missing keys.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(format!("key={}: {}", key, e)))?;
        debug!("Deleted {}", key);
        Ok(())
    }

    async fn download_to_local(&self, src: &str, local_dest: &Path) -> StorageResult<()> {
        let key = self.key_for(src);
        debug!("Downloading {} to {}", key, local_dest.display());

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::not_found(key.clone())
                } else {
                    StorageError::download_failed(format!("key={}: {}", key, e))
                }
            })?;

        if let Some(parent) = local_dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut body = Box::pin(response.body.into_async_read());
        let mut file = tokio::fs::File::create(local_dest).await?;
        tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| StorageError::download_failed(format!("key={}: {}", key, e)))?;
        file.flush().await?;

        info!("Downloaded {} to {}", key, local_dest.display());
        Ok(())
    }

    async fn upload_from_local(&self, local_src: &Path, dest: &str) -> StorageResult<()> {
        let key = self.key_for(dest);
        debug!("Uploading {} to {}", local_src.display(), key);

        let body = ByteStream::from_path(local_src)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", local_src.display(), e)))?;

        self.put_object(&key, body, content_type_for(dest), "processed-at")
            .await?;
        info!("Uploaded {} to {}", local_src.display(), key);
        Ok(())
    }

    async fn public_url(&self, path: &str) -> StorageResult<String> {
        let key = self.resolver.resolve_processed(path);
        if !self.head(&key).await? {
            return Err(StorageError::not_found(key));
        }
        self.presign_get(&key, Duration::from_secs(PUBLIC_URL_TTL_SECS))
            .await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.head(&self.key_for(path)).await
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                StorageError::AwsSdk(format!(
                    "bucket {} does not exist or is not accessible: {}",
                    self.bucket, e
                ))
            })?;
        Ok(())
    }
}

/// Copy a stream of unknown length into a temp file so it can be sent with
/// a known length without holding it in memory. The file is removed when
/// the returned handle drops.
async fn spool_to_disk(
    reader: &mut (dyn AsyncRead + Send + Unpin),
) -> StorageResult<(NamedTempFile, u64)> {
    let spool = NamedTempFile::new()?;
    let mut file = tokio::fs::File::create(spool.path()).await?;
    let size = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    Ok((spool, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spool_to_disk() {
        let payload = vec![7u8; 256 * 1024];
        let mut reader: &[u8] = &payload;
        let (spool, size) = spool_to_disk(&mut reader).await.unwrap();
        assert_eq!(size, payload.len() as u64);
        assert_eq!(tokio::fs::read(spool.path()).await.unwrap(), payload);

        let path = spool.path().to_path_buf();
        drop(spool);
        assert!(!path.exists());
    }

    fn offline_storage(config: S3Config) -> S3Storage {
        let sdk_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .build();
        S3Storage::from_client(Client::from_conf(sdk_config), config)
    }

    #[test]
    fn test_key_resolution_uses_prefixes() {
        let mut config = S3Config::new("bucket", "us-east-1");
        config.upload_prefix = "media/uploads".into();
        config.processed_prefix = "media/processed".into();
        let storage = offline_storage(config);

        assert_eq!(storage.key_for("v1.mp4"), "media/uploads/v1.mp4");
        assert_eq!(
            storage.key_for("processed/v1_processed.mp4"),
            "media/processed/v1_processed.mp4"
        );
        assert_eq!(storage.key_for("media/uploads/x.mov"), "media/uploads/x.mov");
    }

    #[tokio::test]
    async fn test_presign_is_fresh_and_expires_in_an_hour() {
        let storage = offline_storage(S3Config::new("bucket", "us-east-1"));
        let ttl = Duration::from_secs(PUBLIC_URL_TTL_SECS);

        let first = storage.presign_get("processed/v.mp4", ttl).await.unwrap();
        assert!(first.contains("processed/v.mp4"));
        assert!(first.contains("X-Amz-Expires=3600"));
    }

    #[tokio::test]
    async fn test_empty_bucket_rejected() {
        let err = S3Storage::new(S3Config::new("  ", "us-east-1"))
            .await
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_partial_credentials_rejected() {
        let mut config = S3Config::new("bucket", "us-east-1");
        config.access_key_id = Some("key".into());
        let err = S3Storage::new(config).await.err().unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    #[ignore = "requires S3"]
    async fn test_roundtrip_against_bucket() {
        let bucket = std::env::var("S3_BUCKET_NAME").unwrap();
        let region = std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".into());
        let storage = S3Storage::new(S3Config::new(bucket, region)).await.unwrap();
        storage.check_connectivity().await.unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("final.mp4");
        tokio::fs::write(&src, b"bytes").await.unwrap();
        storage
            .upload_from_local(&src, "processed/roundtrip_processed.mp4")
            .await
            .unwrap();
        let url = storage
            .public_url("processed/roundtrip_processed.mp4")
            .await
            .unwrap();
        assert!(url.starts_with("https://"));
        storage
            .delete_file("processed/roundtrip_processed.mp4")
            .await
            .unwrap();
        storage
            .delete_file("processed/roundtrip_processed.mp4")
            .await
            .unwrap();
    }
}

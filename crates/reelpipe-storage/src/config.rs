//! Backend selection from the environment.

use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::local::{LocalStorage, LocalStorageConfig};
use crate::paths::{PROCESSED_PREFIX, UPLOADS_PREFIX};
use crate::s3::{S3Config, S3Storage};

/// Which backend to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Local(LocalStorageConfig),
    S3(S3Config),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local(LocalStorageConfig::default())
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let storage_type = var("STORAGE_TYPE").unwrap_or_else(|| "local".to_string());

        match storage_type.to_ascii_lowercase().as_str() {
            "local" => {
                let defaults = LocalStorageConfig::default();
                Ok(StorageConfig::Local(LocalStorageConfig {
                    upload_dir: var("UPLOAD_PATH").unwrap_or(defaults.upload_dir),
                    processed_dir: var("PROCESSED_PATH").unwrap_or(defaults.processed_dir),
                }))
            }
            "s3" => {
                let bucket_name = var("S3_BUCKET_NAME").ok_or_else(|| {
                    StorageError::config_error("S3_BUCKET_NAME is required when STORAGE_TYPE=s3")
                })?;
                Ok(StorageConfig::S3(S3Config {
                    bucket_name,
                    region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                    endpoint_url: var("S3_ENDPOINT_URL"),
                    access_key_id: var("AWS_ACCESS_KEY_ID"),
                    secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
                    upload_prefix: var("S3_UPLOAD_PREFIX")
                        .unwrap_or_else(|| UPLOADS_PREFIX.to_string()),
                    processed_prefix: var("S3_PROCESSED_PREFIX")
                        .unwrap_or_else(|| PROCESSED_PREFIX.to_string()),
                }))
            }
            other => Err(StorageError::config_error(format!(
                "unknown STORAGE_TYPE '{}', expected 'local' or 's3'",
                other
            ))),
        }
    }
}

/// Build the configured backend.
///
/// Bucket reachability is checked but only logged; a misconfigured bucket
/// surfaces on the first real operation.
pub async fn build_storage(config: StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Local(local) => {
            info!(
                upload_dir = %local.upload_dir,
                processed_dir = %local.processed_dir,
                "Initializing local storage"
            );
            let storage = LocalStorage::new(local);
            storage.ensure_dirs().await?;
            Ok(Arc::new(storage))
        }
        StorageConfig::S3(s3) => {
            info!(bucket = %s3.bucket_name, region = %s3.region, "Initializing S3 storage");
            let storage = S3Storage::new(s3).await?;
            if let Err(e) = storage.check_connectivity().await {
                warn!("S3 bucket verification failed: {}", e);
            }
            Ok(Arc::new(storage))
        }
    }
}

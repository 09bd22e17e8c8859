//! Storage backends for uploaded and processed videos.
//!
//! This crate provides:
//! - The `StorageBackend` trait used by the worker and the upload flow
//! - A local filesystem backend
//! - An S3 backend (also for S3-compatible stores) with presigned URLs
//! - Logical path resolution shared by both backends
//! - Backend selection from the environment

pub mod backend;
pub mod config;
pub mod error;
pub mod local;
pub mod paths;
pub mod s3;

pub use backend::{content_type_for, StorageBackend, PUBLIC_URL_TTL_SECS};
pub use config::{build_storage, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use local::{LocalStorage, LocalStorageConfig};
pub use paths::PathResolver;
pub use s3::{S3Config, S3Storage};

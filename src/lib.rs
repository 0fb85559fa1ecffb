//! Cloud Storage
//!
//! One builder producing blob, table and queue providers that share a
//! serializer, an optional log and an optional runtime finalizer:
//! - Storage account backend speaking the storage REST protocol, with retries
//! - Local storage emulator backend
//! - In-memory backend for tests and local development
//!
//! ```
//! use cloud_storage::CloudStorage;
//!
//! let providers = CloudStorage::for_in_memory_storage().build_all()?;
//! assert!(providers.blob_storage().retry_policy().is_none());
//! # Ok::<(), cloud_storage::domain::DomainError>(())
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::{DomainError, StorageAccount};
pub use infrastructure::storage::{
    CloudStorage, StorageBackend, StorageBuilder, StorageProviders, StorageType,
};

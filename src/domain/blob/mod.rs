//! Blob domain - Named binary objects grouped in containers

mod provider;

pub use provider::{BlobStorageProvider, BlobStorageProviderExt};

//! Blob storage trait definition

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::retry::RetryPolicy;
use crate::domain::serializer::{DataSerializer, DataSerializerExt};
use crate::domain::DomainError;

/// Blob storage capability
///
/// Blobs are addressed by container and name. Writing into a container that
/// does not exist yet creates it.
#[async_trait]
pub trait BlobStorageProvider: Send + Sync + Debug {
    /// Creates a container, returns false if it already existed
    async fn create_container(&self, container: &str) -> Result<bool, DomainError>;

    /// Deletes a container and its blobs, returns false if it did not exist
    async fn delete_container(&self, container: &str) -> Result<bool, DomainError>;

    /// Writes a blob, replacing any previous content
    async fn put_blob(&self, container: &str, name: &str, data: Bytes) -> Result<(), DomainError>;

    /// Reads a blob
    async fn get_blob(&self, container: &str, name: &str) -> Result<Option<Bytes>, DomainError>;

    /// Deletes a blob, returns true if it existed
    async fn delete_blob(&self, container: &str, name: &str) -> Result<bool, DomainError>;

    /// Lists blob names starting with `prefix`, in lexicographic order
    async fn list_blob_names(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<String>, DomainError>;

    /// Serializer this provider was built with
    fn serializer(&self) -> &Arc<dyn DataSerializer>;

    /// Retry policy applied to requests, if the backend is remote
    fn retry_policy(&self) -> Option<&RetryPolicy> {
        None
    }
}

/// Extension trait providing typed blob operations
pub trait BlobStorageProviderExt: BlobStorageProvider {
    /// Serializes and writes a value
    fn put_value<'a, V>(
        &'a self,
        container: &'a str,
        name: &'a str,
        value: &'a V,
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send
    where
        V: Serialize + Send + Sync,
    {
        async move {
            let data = self.serializer().encode(value)?;
            self.put_blob(container, name, data).await
        }
    }

    /// Reads and deserializes a value
    fn get_value<'a, V>(
        &'a self,
        container: &'a str,
        name: &'a str,
    ) -> impl std::future::Future<Output = Result<Option<V>, DomainError>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            match self.get_blob(container, name).await? {
                Some(data) => Ok(Some(self.serializer().decode(&data)?)),
                None => Ok(None),
            }
        }
    }
}

impl<T: BlobStorageProvider + ?Sized> BlobStorageProviderExt for T {}

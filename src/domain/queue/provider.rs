//! Queue storage trait definition

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::blob::BlobStorageProvider;
use crate::domain::retry::RetryPolicy;
use crate::domain::serializer::{DataSerializer, DataSerializerExt};
use crate::domain::DomainError;

use super::message::QueueMessage;

/// Queue storage capability
///
/// Payloads larger than the inline limit are stored through the blob
/// provider returned by [`QueueStorageProvider::blob_storage`].
#[async_trait]
pub trait QueueStorageProvider: Send + Sync + Debug {
    /// Creates a queue, returns false if it already existed
    async fn create_queue(&self, queue: &str) -> Result<bool, DomainError>;

    /// Deletes a queue and its messages, returns false if it did not exist
    async fn delete_queue(&self, queue: &str) -> Result<bool, DomainError>;

    /// Enqueues a payload
    async fn put(&self, queue: &str, payload: Bytes) -> Result<(), DomainError>;

    /// Dequeues up to `max_count` messages, hiding them for `visibility_timeout`
    async fn get(
        &self,
        queue: &str,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, DomainError>;

    /// Deletes a dequeued message, returns false if the receipt is no longer valid
    async fn delete(&self, message: &QueueMessage) -> Result<bool, DomainError>;

    /// Makes a dequeued message visible again right away
    async fn abandon(&self, message: &QueueMessage) -> Result<bool, DomainError>;

    /// Approximate number of messages, visible or not
    async fn approximate_count(&self, queue: &str) -> Result<usize, DomainError>;

    /// Removes every message of a queue
    async fn clear(&self, queue: &str) -> Result<(), DomainError>;

    /// Blob provider receiving overflowing payloads
    fn blob_storage(&self) -> &Arc<dyn BlobStorageProvider>;

    /// Serializer this provider was built with
    fn serializer(&self) -> &Arc<dyn DataSerializer>;

    /// Retry policy applied to requests, if the backend is remote
    fn retry_policy(&self) -> Option<&RetryPolicy> {
        None
    }
}

/// Extension trait providing typed queue operations
pub trait QueueStorageProviderExt: QueueStorageProvider {
    /// Serializes and enqueues a value
    fn put_value<'a, V>(
        &'a self,
        queue: &'a str,
        value: &'a V,
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send
    where
        V: Serialize + Send + Sync,
    {
        async move {
            let payload = self.serializer().encode(value)?;
            self.put(queue, payload).await
        }
    }

    /// Deserializes the payload of a dequeued message
    fn decode<V>(&self, message: &QueueMessage) -> Result<V, DomainError>
    where
        V: DeserializeOwned,
    {
        self.serializer().decode(message.payload())
    }
}

impl<T: QueueStorageProvider + ?Sized> QueueStorageProviderExt for T {}

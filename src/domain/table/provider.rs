//! Table storage trait definition

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::retry::RetryPolicy;
use crate::domain::serializer::{DataSerializer, DataSerializerExt};
use crate::domain::DomainError;

use super::entity::{CloudEntity, TableEntity};

/// Table storage capability
///
/// Entities are addressed by table, partition key and row key. Writing into
/// a table that does not exist yet creates it.
#[async_trait]
pub trait TableStorageProvider: Send + Sync + Debug {
    /// Creates a table, returns false if it already existed
    async fn create_table(&self, table: &str) -> Result<bool, DomainError>;

    /// Deletes a table and its entities, returns false if it did not exist
    async fn delete_table(&self, table: &str) -> Result<bool, DomainError>;

    /// Inserts new entities, fails with a conflict if one already exists
    async fn insert(&self, table: &str, entities: Vec<TableEntity>) -> Result<(), DomainError>;

    /// Inserts or replaces entities
    async fn upsert(&self, table: &str, entities: Vec<TableEntity>) -> Result<(), DomainError>;

    /// Reads a single entity
    async fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableEntity>, DomainError>;

    /// Reads a whole partition ordered by row key
    async fn get_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<TableEntity>, DomainError>;

    /// Deletes an entity, returns true if it existed
    async fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<bool, DomainError>;

    /// Serializer this provider was built with
    fn serializer(&self) -> &Arc<dyn DataSerializer>;

    /// Retry policy applied to requests, if the backend is remote
    fn retry_policy(&self) -> Option<&RetryPolicy> {
        None
    }
}

/// Extension trait providing typed table operations
pub trait TableStorageProviderExt: TableStorageProvider {
    fn insert_values<'a, V>(
        &'a self,
        table: &'a str,
        entities: &'a [CloudEntity<V>],
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send
    where
        V: Serialize + Send + Sync,
    {
        async move {
            let raw = encode_entities(self.serializer().as_ref(), entities)?;
            self.insert(table, raw).await
        }
    }

    fn upsert_values<'a, V>(
        &'a self,
        table: &'a str,
        entities: &'a [CloudEntity<V>],
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send
    where
        V: Serialize + Send + Sync,
    {
        async move {
            let raw = encode_entities(self.serializer().as_ref(), entities)?;
            self.upsert(table, raw).await
        }
    }

    fn get_value<'a, V>(
        &'a self,
        table: &'a str,
        partition_key: &'a str,
        row_key: &'a str,
    ) -> impl std::future::Future<Output = Result<Option<CloudEntity<V>>, DomainError>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            match self.get(table, partition_key, row_key).await? {
                Some(entity) => Ok(Some(decode_entity(self.serializer().as_ref(), entity)?)),
                None => Ok(None),
            }
        }
    }

    fn get_partition_values<'a, V>(
        &'a self,
        table: &'a str,
        partition_key: &'a str,
    ) -> impl std::future::Future<Output = Result<Vec<CloudEntity<V>>, DomainError>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            self.get_partition(table, partition_key)
                .await?
                .into_iter()
                .map(|entity| decode_entity(self.serializer().as_ref(), entity))
                .collect()
        }
    }
}

impl<T: TableStorageProvider + ?Sized> TableStorageProviderExt for T {}

fn encode_entities<V: Serialize>(
    serializer: &dyn DataSerializer,
    entities: &[CloudEntity<V>],
) -> Result<Vec<TableEntity>, DomainError> {
    entities
        .iter()
        .map(|entity| {
            Ok::<_, DomainError>(TableEntity {
                partition_key: entity.partition_key.clone(),
                row_key: entity.row_key.clone(),
                timestamp: entity.timestamp,
                etag: entity.etag.clone(),
                data: serializer.encode(&entity.value)?,
            })
        })
        .collect()
}

fn decode_entity<V: DeserializeOwned>(
    serializer: &dyn DataSerializer,
    entity: TableEntity,
) -> Result<CloudEntity<V>, DomainError> {
    Ok(CloudEntity {
        value: serializer.decode(&entity.data)?,
        partition_key: entity.partition_key,
        row_key: entity.row_key,
        timestamp: entity.timestamp,
        etag: entity.etag,
    })
}

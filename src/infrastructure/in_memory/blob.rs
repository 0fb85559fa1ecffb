//! In-memory blob storage

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::naming::{validate_blob_name, validate_container_name};
use crate::domain::{BlobStorageProvider, DataSerializer, DomainError};

type Containers = HashMap<String, BTreeMap<String, Bytes>>;

/// Thread-safe in-memory blob storage
///
/// Useful for testing and development. Data is lost when the provider is dropped.
#[derive(Debug)]
pub struct InMemoryBlobStorageProvider {
    containers: RwLock<Containers>,
    serializer: Arc<dyn DataSerializer>,
}

impl InMemoryBlobStorageProvider {
    pub fn new(serializer: Arc<dyn DataSerializer>) -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            serializer,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Containers>, DomainError> {
        self.containers
            .read()
            .map_err(|e| DomainError::storage(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Containers>, DomainError> {
        self.containers
            .write()
            .map_err(|e| DomainError::storage(format!("Failed to acquire write lock: {}", e)))
    }
}

#[async_trait]
impl BlobStorageProvider for InMemoryBlobStorageProvider {
    async fn create_container(&self, container: &str) -> Result<bool, DomainError> {
        validate_container_name(container)?;

        let mut containers = self.write()?;
        if containers.contains_key(container) {
            return Ok(false);
        }
        containers.insert(container.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn delete_container(&self, container: &str) -> Result<bool, DomainError> {
        validate_container_name(container)?;

        Ok(self.write()?.remove(container).is_some())
    }

    async fn put_blob(&self, container: &str, name: &str, data: Bytes) -> Result<(), DomainError> {
        validate_container_name(container)?;
        validate_blob_name(name)?;

        self.write()?
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), data);
        Ok(())
    }

    async fn get_blob(&self, container: &str, name: &str) -> Result<Option<Bytes>, DomainError> {
        validate_container_name(container)?;
        validate_blob_name(name)?;

        Ok(self
            .read()?
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .cloned())
    }

    async fn delete_blob(&self, container: &str, name: &str) -> Result<bool, DomainError> {
        validate_container_name(container)?;
        validate_blob_name(name)?;

        Ok(self
            .write()?
            .get_mut(container)
            .map(|blobs| blobs.remove(name).is_some())
            .unwrap_or(false))
    }

    async fn list_blob_names(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<String>, DomainError> {
        validate_container_name(container)?;

        Ok(self
            .read()?
            .get(container)
            .map(|blobs| {
                blobs
                    .range(prefix.to_string()..)
                    .take_while(|(name, _)| name.starts_with(prefix))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn serializer(&self) -> &Arc<dyn DataSerializer> {
        &self.serializer
    }
}

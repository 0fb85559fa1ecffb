//! In-memory table storage

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::naming::validate_table_name;
use crate::domain::table::validate_key;
use crate::domain::{DataSerializer, DomainError, TableEntity, TableStorageProvider};

type Rows = BTreeMap<(String, String), TableEntity>;
type Tables = HashMap<String, Rows>;

/// Thread-safe in-memory table storage
///
/// Entities of a partition are kept sorted by row key; every write stamps a
/// fresh timestamp and etag.
#[derive(Debug)]
pub struct InMemoryTableStorageProvider {
    tables: RwLock<Tables>,
    serializer: Arc<dyn DataSerializer>,
}

impl InMemoryTableStorageProvider {
    pub fn new(serializer: Arc<dyn DataSerializer>) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            serializer,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, DomainError> {
        self.tables
            .read()
            .map_err(|e| DomainError::storage(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, DomainError> {
        self.tables
            .write()
            .map_err(|e| DomainError::storage(format!("Failed to acquire write lock: {}", e)))
    }
}

fn validate(table: &str, entities: &[TableEntity]) -> Result<(), DomainError> {
    validate_table_name(table)?;
    for entity in entities {
        validate_key("PartitionKey", &entity.partition_key)?;
        validate_key("RowKey", &entity.row_key)?;
    }
    Ok(())
}

fn stamp(mut entity: TableEntity) -> ((String, String), TableEntity) {
    entity.timestamp = Some(Utc::now());
    entity.etag = Some(format!("W/\"{}\"", Uuid::new_v4()));
    ((entity.partition_key.clone(), entity.row_key.clone()), entity)
}

#[async_trait]
impl TableStorageProvider for InMemoryTableStorageProvider {
    async fn create_table(&self, table: &str) -> Result<bool, DomainError> {
        validate_table_name(table)?;

        let mut tables = self.write()?;
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn delete_table(&self, table: &str) -> Result<bool, DomainError> {
        validate_table_name(table)?;

        Ok(self.write()?.remove(table).is_some())
    }

    async fn insert(&self, table: &str, entities: Vec<TableEntity>) -> Result<(), DomainError> {
        validate(table, &entities)?;

        let mut tables = self.write()?;
        let rows = tables.entry(table.to_string()).or_default();

        // Nothing is written unless every key is free.
        let mut seen = HashSet::new();
        for entity in &entities {
            let key = (entity.partition_key.clone(), entity.row_key.clone());
            if rows.contains_key(&key) || !seen.insert(key) {
                return Err(DomainError::conflict(format!(
                    "Entity '{}'/'{}' already exists in table '{}'",
                    entity.partition_key, entity.row_key, table
                )));
            }
        }

        rows.extend(entities.into_iter().map(stamp));
        Ok(())
    }

    async fn upsert(&self, table: &str, entities: Vec<TableEntity>) -> Result<(), DomainError> {
        validate(table, &entities)?;

        self.write()?
            .entry(table.to_string())
            .or_default()
            .extend(entities.into_iter().map(stamp));
        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableEntity>, DomainError> {
        validate_table_name(table)?;

        let key = (partition_key.to_string(), row_key.to_string());
        Ok(self
            .read()?
            .get(table)
            .and_then(|rows| rows.get(&key))
            .cloned())
    }

    async fn get_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<TableEntity>, DomainError> {
        validate_table_name(table)?;

        Ok(self
            .read()?
            .get(table)
            .map(|rows| {
                rows.range((partition_key.to_string(), String::new())..)
                    .take_while(|((partition, _), _)| partition == partition_key)
                    .map(|(_, entity)| entity.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<bool, DomainError> {
        validate_table_name(table)?;

        let key = (partition_key.to_string(), row_key.to_string());
        Ok(self
            .write()?
            .get_mut(table)
            .map(|rows| rows.remove(&key).is_some())
            .unwrap_or(false))
    }

    fn serializer(&self) -> &Arc<dyn DataSerializer> {
        &self.serializer
    }
}

//! Table storage provider backed by a storage account

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::domain::log::Log;
use crate::domain::naming::validate_table_name;
use crate::domain::table::validate_key;
use crate::domain::{
    DataSerializer, DomainError, RetryPolicy, StorageAccount, StorageService, TableEntity,
    TableStorageProvider,
};

use super::client::{StorageClient, StorageRequest, StorageResponse};

const APPLICATION_JSON: &str = "application/json";
const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";
const BINARY_TYPE: &str = "Edm.Binary";

/// Entity shape on the wire: keys plus the serialized value as binary
#[derive(Debug, Serialize, Deserialize)]
struct WireEntity {
    #[serde(rename = "PartitionKey")]
    partition_key: String,
    #[serde(rename = "RowKey")]
    row_key: String,
    #[serde(rename = "Timestamp", default, skip_serializing)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "Data", default)]
    data: String,
    #[serde(rename = "Data@odata.type", default, skip_deserializing)]
    data_type: String,
}

impl WireEntity {
    fn from_entity(entity: &TableEntity) -> Self {
        Self {
            partition_key: entity.partition_key.clone(),
            row_key: entity.row_key.clone(),
            timestamp: None,
            data: STANDARD.encode(&entity.data),
            data_type: BINARY_TYPE.to_string(),
        }
    }

    fn into_entity(self, etag: Option<String>) -> Result<TableEntity, DomainError> {
        let data = STANDARD.decode(&self.data).map_err(|e| {
            DomainError::serialization(format!(
                "Entity '{}'/'{}' has invalid binary data: {}",
                self.partition_key, self.row_key, e
            ))
        })?;

        Ok(TableEntity {
            partition_key: self.partition_key,
            row_key: self.row_key,
            timestamp: self.timestamp,
            etag,
            data: Bytes::from(data),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireEntityPage {
    #[serde(default)]
    value: Vec<WireEntity>,
}

/// Table provider talking to the account's table endpoint
#[derive(Debug)]
pub struct RemoteTableStorageProvider {
    client: StorageClient,
    serializer: Arc<dyn DataSerializer>,
}

impl RemoteTableStorageProvider {
    pub fn new(
        account: &StorageAccount,
        serializer: Arc<dyn DataSerializer>,
        retry: RetryPolicy,
        log: Option<Arc<dyn Log>>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            client: StorageClient::new(account, StorageService::Table, retry, log)?,
            serializer,
        })
    }

    fn entity_url(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Url, DomainError> {
        let segment = format!(
            "{}(PartitionKey='{}',RowKey='{}')",
            table,
            quote(partition_key),
            quote(row_key)
        );
        self.client.url(&[&segment])
    }

    fn request(method: Method, url: Url) -> StorageRequest {
        StorageRequest::new(method, url)
            .header("Accept", ACCEPT_NO_METADATA)
            .header("DataServiceVersion", "3.0;NetFx")
            .header("MaxDataServiceVersion", "3.0;NetFx")
    }

    fn json_request(method: Method, url: Url, body: Vec<u8>) -> StorageRequest {
        Self::request(method, url)
            .header("Prefer", "return-no-content")
            .body(APPLICATION_JSON, body)
    }

    /// Runs a write, creating the table once if the service reports it missing
    async fn write(
        &self,
        table: &str,
        operation: &str,
        build: impl Fn() -> Result<StorageRequest, DomainError>,
    ) -> Result<(), DomainError> {
        let response = self.client.execute(build()?).await?;
        if response.status().is_success() {
            return Ok(());
        }
        if !is_table_not_found(&response) {
            return Err(response.into_error(operation));
        }

        self.create_table(table).await?;

        let response = self.client.execute(build()?).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(response.into_error(operation))
        }
    }
}

fn quote(key: &str) -> String {
    key.replace('\'', "''")
}

fn encode(entity: &TableEntity) -> Result<Vec<u8>, DomainError> {
    serde_json::to_vec(&WireEntity::from_entity(entity))
        .map_err(|e| DomainError::serialization(format!("Failed to encode entity: {}", e)))
}

fn validate_entities(table: &str, entities: &[TableEntity]) -> Result<(), DomainError> {
    validate_table_name(table)?;
    for entity in entities {
        validate_key("PartitionKey", &entity.partition_key)?;
        validate_key("RowKey", &entity.row_key)?;
    }
    Ok(())
}

fn is_table_not_found(response: &StorageResponse) -> bool {
    response.status() == StatusCode::NOT_FOUND
        && response.error_code().as_deref() == Some("TableNotFound")
}

#[async_trait]
impl TableStorageProvider for RemoteTableStorageProvider {
    async fn create_table(&self, table: &str) -> Result<bool, DomainError> {
        validate_table_name(table)?;

        let body = serde_json::to_vec(&serde_json::json!({ "TableName": table }))
            .map_err(|e| DomainError::serialization(format!("Failed to encode table: {}", e)))?;
        let request = Self::json_request(Method::POST, self.client.url(&["Tables"])?, body);
        let response = self.client.execute(request).await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            _ => Err(response.into_error(&format!("Create table '{}'", table))),
        }
    }

    async fn delete_table(&self, table: &str) -> Result<bool, DomainError> {
        validate_table_name(table)?;

        let url = self.client.url(&[&format!("Tables('{}')", table)])?;
        let response = self.client.execute(Self::request(Method::DELETE, url)).await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(response.into_error(&format!("Delete table '{}'", table))),
        }
    }

    async fn insert(&self, table: &str, entities: Vec<TableEntity>) -> Result<(), DomainError> {
        validate_entities(table, &entities)?;

        for entity in &entities {
            let body = encode(entity)?;
            let operation = format!(
                "Insert entity '{}'/'{}' into '{}'",
                entity.partition_key, entity.row_key, table
            );

            self.write(table, &operation, || {
                Ok(Self::json_request(Method::POST, self.client.url(&[table])?, body.clone()))
            })
            .await?;
        }

        Ok(())
    }

    async fn upsert(&self, table: &str, entities: Vec<TableEntity>) -> Result<(), DomainError> {
        validate_entities(table, &entities)?;

        for entity in &entities {
            let body = encode(entity)?;
            let operation = format!(
                "Upsert entity '{}'/'{}' into '{}'",
                entity.partition_key, entity.row_key, table
            );

            self.write(table, &operation, || {
                let url = self.entity_url(table, &entity.partition_key, &entity.row_key)?;
                Ok(Self::json_request(Method::PUT, url, body.clone()))
            })
            .await?;
        }

        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableEntity>, DomainError> {
        validate_table_name(table)?;
        validate_key("PartitionKey", partition_key)?;
        validate_key("RowKey", row_key)?;

        let url = self.entity_url(table, partition_key, row_key)?;
        let response = self.client.execute(Self::request(Method::GET, url)).await?;

        match response.status() {
            StatusCode::OK => {
                let etag = response.header("etag").map(str::to_string);
                let wire: WireEntity = response.json()?;
                Ok(Some(wire.into_entity(etag)?))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(response.into_error(&format!(
                "Get entity '{}'/'{}' from '{}'",
                partition_key, row_key, table
            ))),
        }
    }

    async fn get_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<TableEntity>, DomainError> {
        validate_table_name(table)?;
        validate_key("PartitionKey", partition_key)?;

        let filter = format!("PartitionKey eq '{}'", quote(partition_key));
        let mut entities = Vec::new();
        let mut continuation: Option<(String, String)> = None;

        loop {
            let mut url = self.client.url(&[&format!("{}()", table)])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("$filter", &filter);
                if let Some((next_partition, next_row)) = &continuation {
                    query.append_pair("NextPartitionKey", next_partition);
                    query.append_pair("NextRowKey", next_row);
                }
            }
            // Form encoding writes spaces as '+'; the service expects %20.
            let query = url.query().map(|q| q.replace('+', "%20"));
            url.set_query(query.as_deref());

            let response = self.client.execute(Self::request(Method::GET, url)).await?;
            match response.status() {
                StatusCode::OK => {}
                StatusCode::NOT_FOUND => return Ok(Vec::new()),
                _ => {
                    return Err(response.into_error(&format!(
                        "Query partition '{}' of '{}'",
                        partition_key, table
                    )))
                }
            }

            let page: WireEntityPage = response.json()?;
            for wire in page.value {
                entities.push(wire.into_entity(None)?);
            }

            continuation = match (
                response.header("x-ms-continuation-NextPartitionKey"),
                response.header("x-ms-continuation-NextRowKey"),
            ) {
                (Some(partition), Some(row)) => Some((partition.to_string(), row.to_string())),
                _ => None,
            };
            if continuation.is_none() {
                break;
            }
        }

        entities.sort_by(|a, b| a.row_key.cmp(&b.row_key));
        Ok(entities)
    }

    async fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<bool, DomainError> {
        validate_table_name(table)?;
        validate_key("PartitionKey", partition_key)?;
        validate_key("RowKey", row_key)?;

        let url = self.entity_url(table, partition_key, row_key)?;
        let request = Self::request(Method::DELETE, url).header("If-Match", "*");
        let response = self.client.execute(request).await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(response.into_error(&format!(
                "Delete entity '{}'/'{}' from '{}'",
                partition_key, row_key, table
            ))),
        }
    }

    fn serializer(&self) -> &Arc<dyn DataSerializer> {
        &self.serializer
    }

    fn retry_policy(&self) -> Option<&RetryPolicy> {
        Some(self.client.retry_policy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CloudEntity, TableStorageProviderExt};
    use crate::infrastructure::serialization::JsonSerializer;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        total: u32,
    }

    fn provider(server: &MockServer) -> RemoteTableStorageProvider {
        let account = StorageAccount::new("testaccount", "c2VjcmV0LWtleQ==")
            .unwrap()
            .with_endpoint(&server.uri())
            .unwrap();
        RemoteTableStorageProvider::new(
            &account,
            Arc::new(JsonSerializer::new()),
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5), 0.0),
            None,
        )
        .unwrap()
    }

    fn wire(partition: &str, row: &str, data: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "PartitionKey": partition,
            "RowKey": row,
            "Timestamp": "2024-01-01T10:00:00Z",
            "Data": STANDARD.encode(data),
        })
    }

    #[tokio::test]
    async fn test_insert_posts_binary_entity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header("Prefer", "return-no-content"))
            .and(body_json(serde_json::json!({
                "PartitionKey": "p1",
                "RowKey": "r1",
                "Data": STANDARD.encode(br#"{"total":5}"#),
                "Data@odata.type": "Edm.Binary",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider
            .insert_values("orders", &[CloudEntity::new("p1", "r1", Order { total: 5 })])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_existing_entity_conflicts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(409).insert_header("x-ms-error-code", "EntityAlreadyExists"))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let result = provider
            .insert("orders", vec![TableEntity::new("p1", "r1", Bytes::from_static(b"{}"))])
            .await;

        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_upsert_creates_missing_table() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/orders(PartitionKey='p1',RowKey='r1')"))
            .respond_with(ResponseTemplate::new(404).insert_header("x-ms-error-code", "TableNotFound"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Tables"))
            .and(body_json(serde_json::json!({ "TableName": "orders" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/orders(PartitionKey='p1',RowKey='r1')"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider
            .upsert("orders", vec![TableEntity::new("p1", "r1", Bytes::from_static(b"{}"))])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_entity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders(PartitionKey='p1',RowKey='r1')"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "W/\"1\"")
                    .set_body_json(wire("p1", "r1", br#"{"total":9}"#)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders(PartitionKey='p1',RowKey='missing')"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider(&server);

        let entity = provider
            .get_value::<Order>("orders", "p1", "r1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.value, Order { total: 9 });
        assert_eq!(entity.etag.as_deref(), Some("W/\"1\""));
        assert!(entity.timestamp.is_some());

        assert!(provider.get("orders", "p1", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_partition_follows_continuation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders()"))
            .and(query_param("NextRowKey", "r2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "value": [wire("p1", "r2", b"2")] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders()"))
            .and(query_param("$filter", "PartitionKey eq 'p1'"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ms-continuation-NextPartitionKey", "p1")
                    .insert_header("x-ms-continuation-NextRowKey", "r2")
                    .set_body_json(serde_json::json!({ "value": [wire("p1", "r1", b"1")] })),
            )
            .mount(&server)
            .await;

        let provider = provider(&server);
        let entities = provider.get_partition("orders", "p1").await.unwrap();

        let rows: Vec<_> = entities.iter().map(|e| e.row_key.as_str()).collect();
        assert_eq!(rows, vec!["r1", "r2"]);
        assert_eq!(entities[1].data, Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn test_delete_entity() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/orders(PartitionKey='p1',RowKey='r1')"))
            .and(header("If-Match", "*"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let provider = provider(&server);
        assert!(provider.delete("orders", "p1", "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_forbidden_key_characters() {
        let server = MockServer::start().await;
        let provider = provider(&server);

        let result = provider.get("orders", "a/b", "r1").await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[test]
    fn test_quote_doubles_single_quotes() {
        assert_eq!(quote("o'brien"), "o''brien");
    }
}

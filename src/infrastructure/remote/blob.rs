//! Blob storage provider backed by a storage account

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, StatusCode, Url};

use crate::domain::log::Log;
use crate::domain::naming::{validate_blob_name, validate_container_name};
use crate::domain::{
    BlobStorageProvider, DataSerializer, DomainError, RetryPolicy, StorageAccount, StorageService,
};

use super::client::{StorageClient, StorageRequest};
use super::xml;

const OCTET_STREAM: &str = "application/octet-stream";

/// Blob provider talking to the account's blob endpoint
#[derive(Debug)]
pub struct RemoteBlobStorageProvider {
    client: StorageClient,
    serializer: Arc<dyn DataSerializer>,
}

impl RemoteBlobStorageProvider {
    pub fn new(
        account: &StorageAccount,
        serializer: Arc<dyn DataSerializer>,
        retry: RetryPolicy,
        log: Option<Arc<dyn Log>>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            client: StorageClient::new(account, StorageService::Blob, retry, log)?,
            serializer,
        })
    }

    fn container_url(&self, container: &str) -> Result<Url, DomainError> {
        let mut url = self.client.url(&[container])?;
        url.query_pairs_mut().append_pair("restype", "container");
        Ok(url)
    }

    fn blob_url(&self, container: &str, name: &str) -> Result<Url, DomainError> {
        let mut segments = vec![container];
        segments.extend(name.split('/'));
        self.client.url(&segments)
    }

    async fn try_put(&self, container: &str, name: &str, data: &Bytes) -> Result<StatusCode, DomainError> {
        let request = StorageRequest::new(Method::PUT, self.blob_url(container, name)?)
            .header("x-ms-blob-type", "BlockBlob")
            .body(OCTET_STREAM, data.clone());

        let response = self.client.execute(request).await?;
        match response.status() {
            StatusCode::CREATED => Ok(StatusCode::CREATED),
            StatusCode::NOT_FOUND
                if response.error_code().as_deref() == Some("ContainerNotFound") =>
            {
                Ok(StatusCode::NOT_FOUND)
            }
            _ => Err(response.into_error(&format!("Put blob '{}/{}'", container, name))),
        }
    }
}

#[async_trait]
impl BlobStorageProvider for RemoteBlobStorageProvider {
    async fn create_container(&self, container: &str) -> Result<bool, DomainError> {
        validate_container_name(container)?;

        let request = StorageRequest::new(Method::PUT, self.container_url(container)?);
        let response = self.client.execute(request).await?;

        match response.status() {
            StatusCode::CREATED => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            _ => Err(response.into_error(&format!("Create container '{}'", container))),
        }
    }

    async fn delete_container(&self, container: &str) -> Result<bool, DomainError> {
        validate_container_name(container)?;

        let request = StorageRequest::new(Method::DELETE, self.container_url(container)?);
        let response = self.client.execute(request).await?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(response.into_error(&format!("Delete container '{}'", container))),
        }
    }

    async fn put_blob(&self, container: &str, name: &str, data: Bytes) -> Result<(), DomainError> {
        validate_container_name(container)?;
        validate_blob_name(name)?;

        if self.try_put(container, name, &data).await? == StatusCode::CREATED {
            return Ok(());
        }

        self.create_container(container).await?;
        match self.try_put(container, name, &data).await? {
            StatusCode::CREATED => Ok(()),
            _ => Err(DomainError::not_found(format!(
                "Container '{}' disappeared while writing blob '{}'",
                container, name
            ))),
        }
    }

    async fn get_blob(&self, container: &str, name: &str) -> Result<Option<Bytes>, DomainError> {
        validate_container_name(container)?;
        validate_blob_name(name)?;

        let request = StorageRequest::new(Method::GET, self.blob_url(container, name)?);
        let response = self.client.execute(request).await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.body().clone())),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(response.into_error(&format!("Get blob '{}/{}'", container, name))),
        }
    }

    async fn delete_blob(&self, container: &str, name: &str) -> Result<bool, DomainError> {
        validate_container_name(container)?;
        validate_blob_name(name)?;

        let request = StorageRequest::new(Method::DELETE, self.blob_url(container, name)?);
        let response = self.client.execute(request).await?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(response.into_error(&format!("Delete blob '{}/{}'", container, name))),
        }
    }

    async fn list_blob_names(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<String>, DomainError> {
        validate_container_name(container)?;

        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.container_url(container)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("comp", "list");
                if !prefix.is_empty() {
                    query.append_pair("prefix", prefix);
                }
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let response = self.client.execute(StorageRequest::new(Method::GET, url)).await?;
            match response.status() {
                StatusCode::OK => {}
                StatusCode::NOT_FOUND => return Ok(Vec::new()),
                _ => return Err(response.into_error(&format!("List blobs in '{}'", container))),
            }

            let body = response.text()?;
            names.extend(xml::all(&xml::NAME, body));

            marker = xml::first(&xml::NEXT_MARKER, body).filter(|m| !m.is_empty());
            if marker.is_none() {
                break;
            }
        }

        names.sort();
        Ok(names)
    }

    fn serializer(&self) -> &Arc<dyn DataSerializer> {
        &self.serializer
    }

    fn retry_policy(&self) -> Option<&RetryPolicy> {
        Some(self.client.retry_policy())
    }
}

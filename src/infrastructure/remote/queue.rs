//! Queue storage provider backed by a storage account

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Method, StatusCode, Url};
use tracing::warn;

use crate::domain::log::Log;
use crate::domain::naming::validate_queue_name;
use crate::domain::queue::overflow::{self, Unpacked};
use crate::domain::{
    BlobStorageProvider, DataSerializer, DomainError, Finalizable, QueueMessage,
    QueueStorageProvider, RetryPolicy, StorageAccount, StorageService,
};

use super::client::{StorageClient, StorageRequest};
use super::xml;

/// Most messages the service returns per request
const MAX_MESSAGES_PER_REQUEST: usize = 32;

/// Longest visibility timeout the service accepts, seven days
const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 604_800;

const APPLICATION_XML: &str = "application/xml";

/// Queue provider talking to the account's queue endpoint
///
/// Dequeued messages are tracked until they are deleted or abandoned so
/// that finalization can hand them back to the queue.
#[derive(Debug)]
pub struct RemoteQueueStorageProvider {
    client: StorageClient,
    blob: Arc<dyn BlobStorageProvider>,
    serializer: Arc<dyn DataSerializer>,
    in_flight: Mutex<HashMap<String, QueueMessage>>,
}

impl RemoteQueueStorageProvider {
    pub fn new(
        account: &StorageAccount,
        blob: Arc<dyn BlobStorageProvider>,
        serializer: Arc<dyn DataSerializer>,
        retry: RetryPolicy,
        log: Option<Arc<dyn Log>>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            client: StorageClient::new(account, StorageService::Queue, retry, log)?,
            blob,
            serializer,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Number of dequeued messages not yet deleted or abandoned
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn message_url(&self, message: &QueueMessage) -> Result<Url, DomainError> {
        let mut url = self.client.url(&[message.queue(), "messages", message.id()])?;
        url.query_pairs_mut()
            .append_pair("popreceipt", message.receipt());
        Ok(url)
    }

    fn track(&self, message: &QueueMessage) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(message.id().to_string(), message.clone());
        }
    }

    fn untrack(&self, message: &QueueMessage) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(message.id());
        }
    }

    async fn try_put(&self, queue: &str, body: &str) -> Result<bool, DomainError> {
        let url = self.client.url(&[queue, "messages"])?;
        let request = StorageRequest::new(Method::POST, url).body(APPLICATION_XML, body.to_string());

        let response = self.client.execute(request).await?;
        match response.status() {
            StatusCode::CREATED => Ok(true),
            StatusCode::NOT_FOUND
                if response.error_code().as_deref() == Some("QueueNotFound") =>
            {
                Ok(false)
            }
            _ => Err(response.into_error(&format!("Put message on '{}'", queue))),
        }
    }

    /// Posts a message body, creating the queue once if it is missing
    async fn enqueue(&self, queue: &str, body: &str) -> Result<(), DomainError> {
        if self.try_put(queue, body).await? {
            return Ok(());
        }

        self.create_queue(queue).await?;
        if self.try_put(queue, body).await? {
            Ok(())
        } else {
            Err(DomainError::not_found(format!(
                "Queue '{}' disappeared while enqueuing",
                queue
            )))
        }
    }

    /// Deletes a raw message whose overflow payload is gone
    async fn drop_orphan(
        &self,
        queue: &str,
        id: &str,
        receipt: &str,
        location: &str,
    ) -> Result<(), DomainError> {
        let mut url = self.client.url(&[queue, "messages", id])?;
        url.query_pairs_mut().append_pair("popreceipt", receipt);

        let response = self.client.execute(StorageRequest::new(Method::DELETE, url)).await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {}
            _ => return Err(response.into_error(&format!("Delete orphaned message '{}'", id))),
        }

        let message = format!(
            "Dropped message '{}' from queue '{}': overflow blob '{}' is missing",
            id, queue, location
        );
        warn!("{}", message);
        if let Some(log) = self.client.log() {
            log.warn(&message);
        }
        Ok(())
    }

    async fn resolve(&self, queue: &str, fragment: &str) -> Result<Option<QueueMessage>, DomainError> {
        let id = required(&xml::MESSAGE_ID, fragment, queue)?;
        let receipt = required(&xml::POP_RECEIPT, fragment, queue)?;
        let text = required(&xml::MESSAGE_TEXT, fragment, queue)?;
        let dequeue_count = xml::first(&xml::DEQUEUE_COUNT, fragment)
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);
        let inserted_at = xml::first(&xml::INSERTION_TIME, fragment)
            .and_then(|time| DateTime::parse_from_rfc2822(&time).ok())
            .map(|time| time.with_timezone(&Utc));

        let raw = STANDARD.decode(text.trim()).map_err(|e| {
            DomainError::serialization(format!("Message '{}' is not valid base64: {}", id, e))
        })?;

        match overflow::unpack(self.blob.as_ref(), &Bytes::from(raw)).await? {
            Unpacked::Message { payload, overflow } => Ok(Some(
                QueueMessage::new(queue, id, receipt, payload)
                    .with_dequeue_count(dequeue_count)
                    .with_inserted_at(inserted_at)
                    .with_overflow(overflow),
            )),
            Unpacked::Orphaned(location) => {
                let location = format!("{}/{}", location.container, location.name);
                self.drop_orphan(queue, &id, &receipt, &location).await?;
                Ok(None)
            }
        }
    }
}

fn required(pattern: &Regex, fragment: &str, queue: &str) -> Result<String, DomainError> {
    xml::first(pattern, fragment).ok_or_else(|| {
        DomainError::storage(format!("Malformed message returned by queue '{}'", queue))
    })
}

#[async_trait]
impl QueueStorageProvider for RemoteQueueStorageProvider {
    async fn create_queue(&self, queue: &str) -> Result<bool, DomainError> {
        validate_queue_name(queue)?;

        let request = StorageRequest::new(Method::PUT, self.client.url(&[queue])?);
        let response = self.client.execute(request).await?;

        match response.status() {
            StatusCode::CREATED => Ok(true),
            StatusCode::NO_CONTENT | StatusCode::CONFLICT => Ok(false),
            _ => Err(response.into_error(&format!("Create queue '{}'", queue))),
        }
    }

    async fn delete_queue(&self, queue: &str) -> Result<bool, DomainError> {
        validate_queue_name(queue)?;

        let request = StorageRequest::new(Method::DELETE, self.client.url(&[queue])?);
        let response = self.client.execute(request).await?;

        let deleted = match response.status() {
            StatusCode::NO_CONTENT => true,
            StatusCode::NOT_FOUND => false,
            _ => return Err(response.into_error(&format!("Delete queue '{}'", queue))),
        };

        overflow::discard_all(self.blob.as_ref(), queue).await?;
        Ok(deleted)
    }

    async fn put(&self, queue: &str, payload: Bytes) -> Result<(), DomainError> {
        validate_queue_name(queue)?;

        let raw = overflow::pack(self.blob.as_ref(), self.client.log(), queue, payload).await?;
        let body = format!(
            "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            STANDARD.encode(&raw)
        );

        match self.enqueue(queue, &body).await {
            Ok(()) => Ok(()),
            Err(e) => {
                overflow::discard_packed(self.blob.as_ref(), self.client.log(), &raw).await;
                Err(e)
            }
        }
    }

    async fn get(
        &self,
        queue: &str,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, DomainError> {
        validate_queue_name(queue)?;

        if max_count == 0 {
            return Ok(Vec::new());
        }

        let count = max_count.min(MAX_MESSAGES_PER_REQUEST);
        let visibility = visibility_timeout.as_secs().min(MAX_VISIBILITY_TIMEOUT_SECS);

        let mut url = self.client.url(&[queue, "messages"])?;
        url.query_pairs_mut()
            .append_pair("numofmessages", &count.to_string())
            .append_pair("visibilitytimeout", &visibility.to_string());

        let response = self.client.execute(StorageRequest::new(Method::GET, url)).await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(Vec::new()),
            _ => return Err(response.into_error(&format!("Get messages from '{}'", queue))),
        }

        // A message that cannot be resolved stays invisible until its timeout.
        let mut messages = Vec::new();
        let mut first_error = None;
        for fragment in xml::fragments(&xml::QUEUE_MESSAGE, response.text()?) {
            match self.resolve(queue, fragment).await {
                Ok(Some(message)) => {
                    self.track(&message);
                    messages.push(message);
                }
                Ok(None) => {}
                Err(e) => {
                    let text = format!("Skipped unreadable message on queue '{}': {}", queue, e);
                    warn!("{}", text);
                    if let Some(log) = self.client.log() {
                        log.error(&text);
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if messages.is_empty() => Err(e),
            _ => Ok(messages),
        }
    }

    async fn delete(&self, message: &QueueMessage) -> Result<bool, DomainError> {
        let request = StorageRequest::new(Method::DELETE, self.message_url(message)?);
        let response = self.client.execute(request).await?;

        let deleted = match response.status() {
            StatusCode::NO_CONTENT => true,
            StatusCode::NOT_FOUND => false,
            _ => {
                return Err(response.into_error(&format!(
                    "Delete message '{}' from '{}'",
                    message.id(),
                    message.queue()
                )))
            }
        };

        self.untrack(message);
        if deleted {
            overflow::discard(self.blob.as_ref(), message.overflow()).await?;
        }
        Ok(deleted)
    }

    async fn abandon(&self, message: &QueueMessage) -> Result<bool, DomainError> {
        let mut url = self.message_url(message)?;
        url.query_pairs_mut().append_pair("visibilitytimeout", "0");

        let request = StorageRequest::new(Method::PUT, url);
        let response = self.client.execute(request).await?;

        let abandoned = match response.status() {
            StatusCode::NO_CONTENT => true,
            StatusCode::NOT_FOUND => false,
            _ => {
                return Err(response.into_error(&format!(
                    "Abandon message '{}' on '{}'",
                    message.id(),
                    message.queue()
                )))
            }
        };

        self.untrack(message);
        Ok(abandoned)
    }

    async fn approximate_count(&self, queue: &str) -> Result<usize, DomainError> {
        validate_queue_name(queue)?;

        let mut url = self.client.url(&[queue])?;
        url.query_pairs_mut().append_pair("comp", "metadata");

        let response = self.client.execute(StorageRequest::new(Method::GET, url)).await?;
        match response.status() {
            StatusCode::OK => response
                .header("x-ms-approximate-messages-count")
                .and_then(|count| count.parse().ok())
                .ok_or_else(|| {
                    DomainError::storage(format!("Queue '{}' did not report a message count", queue))
                }),
            StatusCode::NOT_FOUND => Ok(0),
            _ => Err(response.into_error(&format!("Get metadata of '{}'", queue))),
        }
    }

    async fn clear(&self, queue: &str) -> Result<(), DomainError> {
        validate_queue_name(queue)?;

        let url = self.client.url(&[queue, "messages"])?;
        let response = self.client.execute(StorageRequest::new(Method::DELETE, url)).await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {}
            _ => return Err(response.into_error(&format!("Clear queue '{}'", queue))),
        }

        overflow::discard_all(self.blob.as_ref(), queue).await?;
        Ok(())
    }

    fn blob_storage(&self) -> &Arc<dyn BlobStorageProvider> {
        &self.blob
    }

    fn serializer(&self) -> &Arc<dyn DataSerializer> {
        &self.serializer
    }

    fn retry_policy(&self) -> Option<&RetryPolicy> {
        Some(self.client.retry_policy())
    }
}

#[async_trait]
impl Finalizable for RemoteQueueStorageProvider {
    async fn finalize(&self) {
        let pending: Vec<QueueMessage> = match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.drain().map(|(_, message)| message).collect(),
            Err(_) => return,
        };

        for message in pending {
            if let Err(e) = self.abandon(&message).await {
                let text = format!(
                    "Failed to return message '{}' to queue '{}': {}",
                    message.id(),
                    message.queue(),
                    e
                );
                warn!("{}", text);
                if let Some(log) = self.client.log() {
                    log.error(&text);
                }
            }
        }
    }
}

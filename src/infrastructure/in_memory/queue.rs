//! In-memory queue storage

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::log::Log;
use crate::domain::naming::validate_queue_name;
use crate::domain::queue::overflow::{self, Unpacked};
use crate::domain::{
    BlobStorageProvider, DataSerializer, DomainError, Finalizable, QueueMessage,
    QueueStorageProvider,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    sequence: u64,
    id: String,
    raw: Bytes,
    dequeue_count: u32,
    inserted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Leased {
    message: StoredMessage,
    receipt: String,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    visible: VecDeque<StoredMessage>,
    leased: HashMap<String, Leased>,
}

impl QueueState {
    /// Returns messages whose visibility timeout elapsed to the head of the queue
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.visible_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut returned: Vec<StoredMessage> = expired
            .iter()
            .filter_map(|id| self.leased.remove(id))
            .map(|lease| lease.message)
            .collect();
        returned.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        for message in returned {
            self.visible.push_front(message);
        }
    }

    fn take_lease(&mut self, message: &QueueMessage) -> Option<Leased> {
        match self.leased.get(message.id()) {
            Some(lease) if lease.receipt == message.receipt() => self.leased.remove(message.id()),
            _ => None,
        }
    }
}

/// Thread-safe in-memory queue storage
///
/// Dequeued messages are leased until deleted, abandoned, or their visibility
/// timeout elapses. Oversized payloads overflow into the blob provider.
#[derive(Debug)]
pub struct InMemoryQueueStorageProvider {
    queues: Mutex<HashMap<String, QueueState>>,
    sequence: AtomicU64,
    blob: Arc<dyn BlobStorageProvider>,
    serializer: Arc<dyn DataSerializer>,
    log: Option<Arc<dyn Log>>,
}

impl InMemoryQueueStorageProvider {
    pub fn new(
        blob: Arc<dyn BlobStorageProvider>,
        serializer: Arc<dyn DataSerializer>,
        log: Option<Arc<dyn Log>>,
    ) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            blob,
            serializer,
            log,
        }
    }

    /// Number of leased messages across all queues
    pub fn in_flight(&self) -> usize {
        self.queues
            .lock()
            .map(|queues| queues.values().map(|q| q.leased.len()).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, QueueState>>, DomainError> {
        self.queues
            .lock()
            .map_err(|e| DomainError::storage(format!("Failed to acquire queue lock: {}", e)))
    }

    fn lease(
        &self,
        queue: &str,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<(StoredMessage, String)>, DomainError> {
        let mut queues = self.lock()?;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        state.release_expired(now);

        let mut leased = Vec::new();
        while leased.len() < max_count {
            let Some(mut message) = state.visible.pop_front() else {
                break;
            };
            message.dequeue_count += 1;
            let receipt = Uuid::new_v4().to_string();

            state.leased.insert(
                message.id.clone(),
                Leased {
                    message: message.clone(),
                    receipt: receipt.clone(),
                    visible_at: now + visibility_timeout,
                },
            );
            leased.push((message, receipt));
        }

        Ok(leased)
    }

    fn forget(&self, queue: &str, id: &str) -> Result<(), DomainError> {
        if let Some(state) = self.lock()?.get_mut(queue) {
            state.leased.remove(id);
        }
        Ok(())
    }

    fn report_orphan(&self, queue: &str, id: &str, container: &str, name: &str) {
        let message = format!(
            "Dropped message '{}' from queue '{}': overflow blob '{}/{}' is missing",
            id, queue, container, name
        );
        warn!("{}", message);
        if let Some(log) = &self.log {
            log.warn(&message);
        }
    }
}

#[async_trait]
impl QueueStorageProvider for InMemoryQueueStorageProvider {
    async fn create_queue(&self, queue: &str) -> Result<bool, DomainError> {
        validate_queue_name(queue)?;

        let mut queues = self.lock()?;
        if queues.contains_key(queue) {
            return Ok(false);
        }
        queues.insert(queue.to_string(), QueueState::default());
        Ok(true)
    }

    async fn delete_queue(&self, queue: &str) -> Result<bool, DomainError> {
        validate_queue_name(queue)?;

        let existed = self.lock()?.remove(queue).is_some();
        overflow::discard_all(self.blob.as_ref(), queue).await?;
        Ok(existed)
    }

    async fn put(&self, queue: &str, payload: Bytes) -> Result<(), DomainError> {
        validate_queue_name(queue)?;

        let raw = overflow::pack(self.blob.as_ref(), self.log.as_deref(), queue, payload).await?;
        let message = StoredMessage {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            id: Uuid::new_v4().to_string(),
            raw: raw.clone(),
            dequeue_count: 0,
            inserted_at: Utc::now(),
        };

        let enqueued = self.lock().map(|mut queues| {
            queues
                .entry(queue.to_string())
                .or_default()
                .visible
                .push_back(message)
        });

        if enqueued.is_err() {
            overflow::discard_packed(self.blob.as_ref(), self.log.as_deref(), &raw).await;
        }
        enqueued
    }

    async fn get(
        &self,
        queue: &str,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, DomainError> {
        validate_queue_name(queue)?;

        // An unreadable message keeps its lease and reappears once it expires.
        let mut messages = Vec::new();
        let mut first_error = None;
        for (stored, receipt) in self.lease(queue, max_count, visibility_timeout)? {
            match overflow::unpack(self.blob.as_ref(), &stored.raw).await {
                Ok(Unpacked::Message { payload, overflow }) => messages.push(
                    QueueMessage::new(queue, stored.id, receipt, payload)
                        .with_dequeue_count(stored.dequeue_count)
                        .with_inserted_at(Some(stored.inserted_at))
                        .with_overflow(overflow),
                ),
                Ok(Unpacked::Orphaned(location)) => {
                    self.forget(queue, &stored.id)?;
                    self.report_orphan(queue, &stored.id, &location.container, &location.name);
                }
                Err(e) => {
                    let text = format!(
                        "Skipped unreadable message '{}' on queue '{}': {}",
                        stored.id, queue, e
                    );
                    warn!("{}", text);
                    if let Some(log) = &self.log {
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
        let removed = self
            .lock()?
            .get_mut(message.queue())
            .and_then(|state| state.take_lease(message))
            .is_some();

        if removed {
            overflow::discard(self.blob.as_ref(), message.overflow()).await?;
        }
        Ok(removed)
    }

    async fn abandon(&self, message: &QueueMessage) -> Result<bool, DomainError> {
        let mut queues = self.lock()?;
        let Some(state) = queues.get_mut(message.queue()) else {
            return Ok(false);
        };

        match state.take_lease(message) {
            Some(lease) => {
                state.visible.push_front(lease.message);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn approximate_count(&self, queue: &str) -> Result<usize, DomainError> {
        validate_queue_name(queue)?;

        Ok(self
            .lock()?
            .get(queue)
            .map(|state| state.visible.len() + state.leased.len())
            .unwrap_or(0))
    }

    async fn clear(&self, queue: &str) -> Result<(), DomainError> {
        validate_queue_name(queue)?;

        if let Some(state) = self.lock()?.get_mut(queue) {
            state.visible.clear();
            state.leased.clear();
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
}

#[async_trait]
impl Finalizable for InMemoryQueueStorageProvider {
    async fn finalize(&self) {
        let Ok(mut queues) = self.queues.lock() else {
            return;
        };

        let mut returned = 0;
        for state in queues.values_mut() {
            let mut leases: Vec<Leased> = state.leased.drain().map(|(_, lease)| lease).collect();
            leases.sort_by(|a, b| b.message.sequence.cmp(&a.message.sequence));
            returned += leases.len();

            for lease in leases {
                state.visible.push_front(lease.message);
            }
        }

        debug!(returned, "Returned in-flight messages to their queues");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        LogLevel, QueueStorageProviderExt, MAX_INLINE_MESSAGE_BYTES, OVERFLOW_CONTAINER,
    };
    use crate::infrastructure::in_memory::InMemoryBlobStorageProvider;
    use crate::infrastructure::logging::MemoryLog;
    use crate::infrastructure::serialization::JsonSerializer;

    const HIDDEN: Duration = Duration::from_secs(60);

    fn provider(log: Option<Arc<dyn Log>>) -> InMemoryQueueStorageProvider {
        let serializer: Arc<dyn DataSerializer> = Arc::new(JsonSerializer::new());
        let blob = Arc::new(InMemoryBlobStorageProvider::new(serializer.clone()));
        InMemoryQueueStorageProvider::new(blob, serializer, log)
    }

    #[tokio::test]
    async fn test_fifo_round_trip() {
        let provider = provider(None);
        provider.put_value("jobs", &1u32).await.unwrap();
        provider.put_value("jobs", &2u32).await.unwrap();

        let messages = provider.get("jobs", 10, HIDDEN).await.unwrap();
        let values: Vec<u32> = messages
            .iter()
            .map(|m| provider.decode(m).unwrap())
            .collect();

        assert_eq!(values, vec![1, 2]);
        assert_eq!(messages[0].dequeue_count(), 1);
        assert!(messages[0].inserted_at().is_some());
    }

    #[tokio::test]
    async fn test_leased_messages_are_hidden() {
        let provider = provider(None);
        provider.put("jobs", Bytes::from_static(b"\"a\"")).await.unwrap();

        assert_eq!(provider.get("jobs", 1, HIDDEN).await.unwrap().len(), 1);
        assert!(provider.get("jobs", 1, HIDDEN).await.unwrap().is_empty());
        assert_eq!(provider.approximate_count("jobs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_reappears() {
        let provider = provider(None);
        provider.put("jobs", Bytes::from_static(b"\"a\"")).await.unwrap();

        let first = provider.get("jobs", 1, Duration::ZERO).await.unwrap();
        let second = provider.get("jobs", 1, HIDDEN).await.unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id(), first[0].id());
        assert_eq!(second[0].dequeue_count(), 2);
        assert_ne!(second[0].receipt(), first[0].receipt());

        // The first receipt is stale once the message was handed out again.
        assert!(!provider.delete(&first[0]).await.unwrap());
        assert!(provider.delete(&second[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_abandon_makes_message_visible() {
        let provider = provider(None);
        provider.put("jobs", Bytes::from_static(b"\"a\"")).await.unwrap();

        let message = provider.get("jobs", 1, HIDDEN).await.unwrap().remove(0);
        assert!(provider.abandon(&message).await.unwrap());
        assert!(!provider.abandon(&message).await.unwrap());

        assert_eq!(provider.get("jobs", 1, HIDDEN).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_message() {
        let provider = provider(None);
        provider.put("jobs", Bytes::from_static(b"\"a\"")).await.unwrap();

        let message = provider.get("jobs", 1, HIDDEN).await.unwrap().remove(0);
        assert!(provider.delete(&message).await.unwrap());
        assert_eq!(provider.approximate_count("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_large_payload_round_trips_through_blob() {
        let provider = provider(None);
        let big = "x".repeat(MAX_INLINE_MESSAGE_BYTES + 10);
        provider.put_value("jobs", &big).await.unwrap();

        let blobs = provider.blob_storage().clone();
        assert_eq!(blobs.list_blob_names(OVERFLOW_CONTAINER, "jobs/").await.unwrap().len(), 1);

        let message = provider.get("jobs", 1, HIDDEN).await.unwrap().remove(0);
        assert!(message.overflow().is_some());
        assert_eq!(provider.decode::<String>(&message).unwrap(), big);

        provider.delete(&message).await.unwrap();
        assert!(blobs.list_blob_names(OVERFLOW_CONTAINER, "jobs/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_message_is_dropped_and_logged() {
        let log = Arc::new(MemoryLog::new());
        let provider = provider(Some(log.clone()));
        provider
            .put("jobs", Bytes::from(vec![b'"'; MAX_INLINE_MESSAGE_BYTES + 1]))
            .await
            .unwrap();

        let blobs = provider.blob_storage().clone();
        for name in blobs.list_blob_names(OVERFLOW_CONTAINER, "jobs/").await.unwrap() {
            blobs.delete_blob(OVERFLOW_CONTAINER, &name).await.unwrap();
        }

        assert!(provider.get("jobs", 1, HIDDEN).await.unwrap().is_empty());
        assert_eq!(provider.approximate_count("jobs").await.unwrap(), 0);
        assert_eq!(log.count(LogLevel::Warn), 1);
    }

    fn push_raw(provider: &InMemoryQueueStorageProvider, queue: &str, raw: &'static [u8]) {
        provider
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .visible
            .push_back(StoredMessage {
                sequence: provider.sequence.fetch_add(1, Ordering::Relaxed),
                id: Uuid::new_v4().to_string(),
                raw: Bytes::from_static(raw),
                dequeue_count: 0,
                inserted_at: Utc::now(),
            });
    }

    #[tokio::test]
    async fn test_unreadable_message_does_not_lose_batch() {
        let log = Arc::new(MemoryLog::new());
        let provider = provider(Some(log.clone()));
        push_raw(&provider, "jobs", &[9, b'x']);
        provider.put_value("jobs", &7u32).await.unwrap();

        let messages = provider.get("jobs", 10, HIDDEN).await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(provider.decode::<u32>(&messages[0]).unwrap(), 7);
        assert_eq!(provider.in_flight(), 2);
        assert_eq!(log.count(LogLevel::Error), 1);
    }

    #[tokio::test]
    async fn test_batch_of_only_unreadable_messages_fails() {
        let provider = provider(None);
        push_raw(&provider, "jobs", &[]);

        let result = provider.get("jobs", 10, HIDDEN).await;

        assert!(matches!(result, Err(DomainError::Serialization { .. })));
    }

    #[tokio::test]
    async fn test_clear_discards_messages_and_overflow() {
        let provider = provider(None);
        provider.put("jobs", Bytes::from_static(b"1")).await.unwrap();
        provider
            .put("jobs", Bytes::from(vec![b'1'; MAX_INLINE_MESSAGE_BYTES + 1]))
            .await
            .unwrap();

        provider.clear("jobs").await.unwrap();

        assert_eq!(provider.approximate_count("jobs").await.unwrap(), 0);
        let blobs = provider.blob_storage();
        assert!(blobs.list_blob_names(OVERFLOW_CONTAINER, "jobs/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_returns_leased_messages() {
        let provider = provider(None);
        provider.put("jobs", Bytes::from_static(b"1")).await.unwrap();
        provider.put("jobs", Bytes::from_static(b"2")).await.unwrap();

        provider.get("jobs", 2, HIDDEN).await.unwrap();
        assert_eq!(provider.in_flight(), 2);

        provider.finalize().await;
        assert_eq!(provider.in_flight(), 0);

        let payloads: Vec<Bytes> = provider
            .get("jobs", 2, HIDDEN)
            .await
            .unwrap()
            .iter()
            .map(|m| m.payload().clone())
            .collect();
        assert_eq!(payloads, vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);
    }

    #[tokio::test]
    async fn test_queue_lifecycle() {
        let provider = provider(None);

        assert!(provider.create_queue("jobs").await.unwrap());
        assert!(!provider.create_queue("jobs").await.unwrap());
        assert!(provider.delete_queue("jobs").await.unwrap());
        assert!(!provider.delete_queue("jobs").await.unwrap());
        assert!(provider.get("jobs", 1, HIDDEN).await.unwrap().is_empty());
    }
}

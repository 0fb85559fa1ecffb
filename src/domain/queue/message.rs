//! Queue message handle

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::overflow::BlobLocation;

/// A message retrieved from a queue
///
/// The message stays invisible to other consumers until it is deleted,
/// abandoned, or its visibility timeout elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    id: String,
    receipt: String,
    queue: String,
    payload: Bytes,
    dequeue_count: u32,
    inserted_at: Option<DateTime<Utc>>,
    overflow: Option<BlobLocation>,
}

impl QueueMessage {
    pub(crate) fn new(
        queue: impl Into<String>,
        id: impl Into<String>,
        receipt: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            id: id.into(),
            receipt: receipt.into(),
            queue: queue.into(),
            payload,
            dequeue_count: 1,
            inserted_at: None,
            overflow: None,
        }
    }

    pub(crate) fn with_dequeue_count(mut self, count: u32) -> Self {
        self.dequeue_count = count;
        self
    }

    pub(crate) fn with_inserted_at(mut self, inserted_at: Option<DateTime<Utc>>) -> Self {
        self.inserted_at = inserted_at;
        self
    }

    pub(crate) fn with_overflow(mut self, overflow: Option<BlobLocation>) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Opaque token proving the current holder dequeued the message
    pub fn receipt(&self) -> &str {
        &self.receipt
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn dequeue_count(&self) -> u32 {
        self.dequeue_count
    }

    pub fn inserted_at(&self) -> Option<DateTime<Utc>> {
        self.inserted_at
    }

    /// Where the payload was stored if it was too large to travel inline
    pub fn overflow(&self) -> Option<&BlobLocation> {
        self.overflow.as_ref()
    }
}

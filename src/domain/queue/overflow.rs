//! Overflow of oversized queue messages into blob storage
//!
//! Every raw queue payload starts with a one-byte tag. Inline messages carry
//! their bytes after the tag; overflowing messages carry a JSON
//! [`BlobLocation`] pointing at the blob holding the real payload.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::blob::BlobStorageProvider;
use crate::domain::log::Log;
use crate::domain::DomainError;

/// Largest payload sent inline through a queue
pub const MAX_INLINE_MESSAGE_BYTES: usize = 48_000;

/// Container receiving oversized payloads
pub const OVERFLOW_CONTAINER: &str = "queue-overflow";

const INLINE_TAG: u8 = 0;
const OVERFLOW_TAG: u8 = 1;

/// Location of an overflowing payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobLocation {
    pub container: String,
    pub name: String,
}

/// Result of resolving a raw queue payload
#[derive(Debug)]
pub(crate) enum Unpacked {
    Message {
        payload: Bytes,
        overflow: Option<BlobLocation>,
    },
    /// The overflow blob is gone; the message can only be dropped
    Orphaned(BlobLocation),
}

/// Wraps a payload for the queue, spilling it to blob storage when too large
pub(crate) async fn pack(
    blob: &dyn BlobStorageProvider,
    log: Option<&dyn Log>,
    queue: &str,
    payload: Bytes,
) -> Result<Bytes, DomainError> {
    if payload.len() <= MAX_INLINE_MESSAGE_BYTES {
        let mut buf = BytesMut::with_capacity(payload.len() + 1);
        buf.put_u8(INLINE_TAG);
        buf.extend_from_slice(&payload);
        return Ok(buf.freeze());
    }

    let location = BlobLocation {
        container: OVERFLOW_CONTAINER.to_string(),
        name: format!("{}/{}", queue, Uuid::new_v4()),
    };
    let size = payload.len();

    blob.put_blob(&location.container, &location.name, payload)
        .await?;

    if let Some(log) = log {
        log.debug(&format!(
            "Queue '{}' message of {} bytes overflowed to blob '{}/{}'",
            queue, size, location.container, location.name
        ));
    }

    let pointer = serde_json::to_vec(&location).map_err(|e| {
        DomainError::serialization(format!("Failed to encode overflow location: {}", e))
    })?;

    let mut buf = BytesMut::with_capacity(pointer.len() + 1);
    buf.put_u8(OVERFLOW_TAG);
    buf.extend_from_slice(&pointer);
    Ok(buf.freeze())
}

/// Resolves a raw queue payload back to the original bytes
pub(crate) async fn unpack(
    blob: &dyn BlobStorageProvider,
    raw: &Bytes,
) -> Result<Unpacked, DomainError> {
    match raw.first() {
        Some(&INLINE_TAG) => Ok(Unpacked::Message {
            payload: raw.slice(1..),
            overflow: None,
        }),
        Some(&OVERFLOW_TAG) => {
            let location: BlobLocation = serde_json::from_slice(&raw[1..]).map_err(|e| {
                DomainError::serialization(format!("Invalid overflow location: {}", e))
            })?;

            match blob.get_blob(&location.container, &location.name).await? {
                Some(payload) => Ok(Unpacked::Message {
                    payload,
                    overflow: Some(location),
                }),
                None => Ok(Unpacked::Orphaned(location)),
            }
        }
        Some(tag) => Err(DomainError::serialization(format!(
            "Unknown queue message tag {}",
            tag
        ))),
        None => Err(DomainError::serialization("Empty queue message")),
    }
}

/// Removes the overflow blob of a consumed message
pub(crate) async fn discard(
    blob: &dyn BlobStorageProvider,
    location: Option<&BlobLocation>,
) -> Result<(), DomainError> {
    if let Some(location) = location {
        blob.delete_blob(&location.container, &location.name).await?;
    }
    Ok(())
}

/// Removes the overflow blob of a packed payload that never reached the queue
///
/// Failures are only logged so the caller can report the original error.
pub(crate) async fn discard_packed(blob: &dyn BlobStorageProvider, log: Option<&dyn Log>, raw: &Bytes) {
    if raw.first() != Some(&OVERFLOW_TAG) {
        return;
    }
    let Ok(location) = serde_json::from_slice::<BlobLocation>(&raw[1..]) else {
        return;
    };

    if let Err(e) = blob.delete_blob(&location.container, &location.name).await {
        let text = format!(
            "Failed to remove overflow blob '{}/{}': {}",
            location.container, location.name, e
        );
        tracing::warn!("{}", text);
        if let Some(log) = log {
            log.warn(&text);
        }
    }
}

/// Removes every overflow blob belonging to a queue
pub(crate) async fn discard_all(
    blob: &dyn BlobStorageProvider,
    queue: &str,
) -> Result<usize, DomainError> {
    let names = blob
        .list_blob_names(OVERFLOW_CONTAINER, &format!("{}/", queue))
        .await?;

    for name in &names {
        blob.delete_blob(OVERFLOW_CONTAINER, name).await?;
    }

    Ok(names.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryBlobStorageProvider;
    use crate::infrastructure::serialization::JsonSerializer;
    use std::sync::Arc;

    fn blob() -> InMemoryBlobStorageProvider {
        InMemoryBlobStorageProvider::new(Arc::new(JsonSerializer::new()))
    }

    #[tokio::test]
    async fn test_discard_packed_removes_unsent_overflow() {
        let blob = blob();
        let raw = pack(&blob, None, "jobs", Bytes::from(vec![b'a'; MAX_INLINE_MESSAGE_BYTES + 1]))
            .await
            .unwrap();
        assert_eq!(blob.list_blob_names(OVERFLOW_CONTAINER, "jobs/").await.unwrap().len(), 1);

        discard_packed(&blob, None, &raw).await;

        assert!(blob.list_blob_names(OVERFLOW_CONTAINER, "jobs/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_packed_ignores_inline_payloads() {
        let blob = blob();
        let raw = pack(&blob, None, "jobs", Bytes::from_static(b"small")).await.unwrap();

        discard_packed(&blob, None, &raw).await;

        match unpack(&blob, &raw).await.unwrap() {
            Unpacked::Message { payload, overflow } => {
                assert_eq!(payload, Bytes::from_static(b"small"));
                assert!(overflow.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

//! Queue domain - Message queues with blob overflow for large payloads

mod message;
pub(crate) mod overflow;
mod provider;

pub use message::QueueMessage;
pub use overflow::{BlobLocation, MAX_INLINE_MESSAGE_BYTES, OVERFLOW_CONTAINER};
pub use provider::{QueueStorageProvider, QueueStorageProviderExt};

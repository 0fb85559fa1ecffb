//! Domain layer - Capability contracts and value types

pub mod account;
pub mod blob;
pub mod error;
pub mod finalizer;
pub mod log;
pub mod naming;
pub mod queue;
pub mod retry;
pub mod serializer;
pub mod table;

pub use account::{StorageAccount, StorageService, DEVELOPMENT_ACCOUNT_KEY, DEVELOPMENT_ACCOUNT_NAME};
pub use blob::{BlobStorageProvider, BlobStorageProviderExt};
pub use error::DomainError;
pub use finalizer::{Finalizable, RuntimeFinalizer};
pub use log::{Log, LogLevel};
pub use queue::{
    BlobLocation, QueueMessage, QueueStorageProvider, QueueStorageProviderExt,
    MAX_INLINE_MESSAGE_BYTES, OVERFLOW_CONTAINER,
};
pub use retry::RetryPolicy;
pub use serializer::{DataSerializer, DataSerializerExt};
pub use table::{CloudEntity, TableEntity, TableStorageProvider, TableStorageProviderExt};

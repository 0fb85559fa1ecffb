//! Storage account backed providers speaking the storage REST protocol

mod auth;
mod blob;
mod client;
mod queue;
mod table;
mod xml;

pub use auth::SharedKeySigner;
pub use blob::RemoteBlobStorageProvider;
pub use client::STORAGE_API_VERSION;
pub use queue::RemoteQueueStorageProvider;
pub use table::RemoteTableStorageProvider;

//! In-process providers for tests and local development

mod blob;
mod queue;
mod table;

pub use blob::InMemoryBlobStorageProvider;
pub use queue::InMemoryQueueStorageProvider;
pub use table::InMemoryTableStorageProvider;

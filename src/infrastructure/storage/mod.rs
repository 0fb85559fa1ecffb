//! Storage factory - Builder, backend selection and provider aggregate

mod builder;
mod factory;
mod providers;

pub use builder::{StorageBackend, StorageBuilder};
pub use factory::{CloudStorage, StorageType};
pub use providers::StorageProviders;

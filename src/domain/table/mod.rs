//! Table domain - Partitioned entities addressed by partition and row keys

mod entity;
mod provider;

pub(crate) use entity::validate_key;
pub use entity::{CloudEntity, TableEntity};
pub use provider::{TableStorageProvider, TableStorageProviderExt};

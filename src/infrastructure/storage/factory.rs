//! Backend selection entry points

use std::sync::Arc;

use crate::config::{SerializerFormat, StorageSettings};
use crate::domain::{DomainError, StorageAccount};
use crate::infrastructure::serialization::JsonSerializer;

use super::builder::{StorageBackend, StorageBuilder};

/// Supported storage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageType {
    /// Process-local stores (for testing/development)
    #[default]
    InMemory,
    /// Remote account given by a connection string
    Account,
    /// Local storage emulator
    Development,
}

impl StorageType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Some(Self::InMemory),
            "account" | "azure" | "remote" => Some(Self::Account),
            "development" | "dev" => Some(Self::Development),
            _ => None,
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::InMemory => write!(f, "in_memory"),
            StorageType::Account => write!(f, "account"),
            StorageType::Development => write!(f, "development"),
        }
    }
}

/// Entry points selecting the backend of a [`StorageBuilder`]
#[derive(Debug)]
pub struct CloudStorage;

impl CloudStorage {
    /// Builder for an already validated account
    pub fn for_account(account: StorageAccount) -> StorageBuilder {
        StorageBuilder::new(StorageBackend::Account(account))
    }

    /// Builder for the account described by a connection string
    ///
    /// Fails right away if the connection string is unusable.
    pub fn for_connection_string(connection_string: &str) -> Result<StorageBuilder, DomainError> {
        let account = StorageAccount::parse(connection_string)?;
        Ok(Self::for_account(account))
    }

    /// Builder for the local storage emulator
    pub fn for_development_storage() -> StorageBuilder {
        Self::for_account(StorageAccount::development())
    }

    /// Builder for process-local stores
    pub fn for_in_memory_storage() -> StorageBuilder {
        StorageBuilder::new(StorageBackend::InMemory)
    }

    /// Builder described by application settings
    pub fn from_settings(settings: &StorageSettings) -> Result<StorageBuilder, DomainError> {
        let backend = StorageType::from_str(&settings.backend).ok_or_else(|| {
            DomainError::configuration(format!(
                "Unknown storage backend: {}. Valid backends: in_memory, account, development",
                settings.backend
            ))
        })?;

        let mut builder = match backend {
            StorageType::InMemory => Self::for_in_memory_storage(),
            StorageType::Development => Self::for_development_storage(),
            StorageType::Account => {
                let connection_string = settings
                    .connection_string
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| {
                        DomainError::configuration(
                            "A connection string is required for the account backend",
                        )
                    })?;
                Self::for_connection_string(connection_string)?
            }
        };

        let serializer = match settings.serializer {
            SerializerFormat::Json => JsonSerializer::new(),
            SerializerFormat::PrettyJson => JsonSerializer::pretty(),
        };
        builder.with_serializer(Arc::new(serializer));

        Ok(builder)
    }
}

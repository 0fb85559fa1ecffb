//! Table entity types

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::domain::DomainError;

/// Raw table entity as stored by a provider
///
/// `data` holds the serialized value; the provider's serializer decides its
/// representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub data: Bytes,
}

impl TableEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>, data: Bytes) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            timestamp: None,
            etag: None,
            data,
        }
    }
}

/// Typed table entity
#[derive(Debug, Clone, PartialEq)]
pub struct CloudEntity<T> {
    pub partition_key: String,
    pub row_key: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub value: T,
}

impl<T> CloudEntity<T> {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>, value: T) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            timestamp: None,
            etag: None,
            value,
        }
    }
}

/// Rejects keys the table service cannot address
pub(crate) fn validate_key(kind: &str, key: &str) -> Result<(), DomainError> {
    if key.len() > 1024 {
        return Err(DomainError::validation(format!(
            "{} exceeds 1024 characters",
            kind
        )));
    }

    if let Some(c) = key.chars().find(|c| matches!(c, '/' | '\\' | '#' | '?') || c.is_control()) {
        return Err(DomainError::validation(format!(
            "{} '{}' contains forbidden character {:?}",
            kind, key, c
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("PartitionKey", "customers-2024").is_ok());
        assert!(validate_key("PartitionKey", "").is_ok());
        assert!(validate_key("RowKey", "a/b").is_err());
        assert!(validate_key("RowKey", "tab\there").is_err());
        assert!(validate_key("RowKey", &"x".repeat(1025)).is_err());
    }
}

//! Data serializer contract
//!
//! Providers never serialize on their own: every typed value written to a
//! blob, table entity or queue message goes through the serializer the
//! provider was built with.

use std::fmt::Debug;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::DomainError;

/// Converts values to and from a storage-neutral byte representation
///
/// The trait works on `serde_json::Value` so it stays dyn-compatible.
/// Use [`DataSerializerExt`] for typed conversions.
pub trait DataSerializer: Send + Sync + Debug {
    /// Short name identifying the codec (e.g. "json")
    fn name(&self) -> &str;

    /// Encodes a value into bytes
    fn serialize_value(&self, value: &serde_json::Value) -> Result<Bytes, DomainError>;

    /// Decodes bytes produced by `serialize_value`
    fn deserialize_value(&self, data: &[u8]) -> Result<serde_json::Value, DomainError>;
}

/// Typed helpers on top of [`DataSerializer`]
pub trait DataSerializerExt: DataSerializer {
    /// Encodes a typed value
    fn encode<T>(&self, value: &T) -> Result<Bytes, DomainError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value)
            .map_err(|e| DomainError::serialization(format!("Failed to serialize value: {}", e)))?;
        self.serialize_value(&value)
    }

    /// Decodes a typed value
    fn decode<T>(&self, data: &[u8]) -> Result<T, DomainError>
    where
        T: DeserializeOwned,
    {
        let value = self.deserialize_value(data)?;
        serde_json::from_value(value).map_err(|e| {
            DomainError::serialization(format!("Failed to deserialize value: {}", e))
        })
    }
}

impl<S: DataSerializer + ?Sized> DataSerializerExt for S {}

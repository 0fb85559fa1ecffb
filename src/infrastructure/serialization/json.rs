//! JSON data serializer

use bytes::Bytes;

use crate::domain::serializer::DataSerializer;
use crate::domain::DomainError;

/// Serializer writing UTF-8 JSON
///
/// This is the default codec of every storage builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Compact output
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Indented output, easier to inspect in storage explorers
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }
}

impl DataSerializer for JsonSerializer {
    fn name(&self) -> &str {
        if self.pretty { "pretty_json" } else { "json" }
    }

    fn serialize_value(&self, value: &serde_json::Value) -> Result<Bytes, DomainError> {
        let data = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|e| DomainError::serialization(format!("Failed to encode JSON: {}", e)))?;

        Ok(Bytes::from(data))
    }

    fn deserialize_value(&self, data: &[u8]) -> Result<serde_json::Value, DomainError> {
        serde_json::from_slice(data)
            .map_err(|e| DomainError::serialization(format!("Failed to decode JSON: {}", e)))
    }
}

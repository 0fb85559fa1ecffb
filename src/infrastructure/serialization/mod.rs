//! Serializer implementations

mod json;

pub use json::JsonSerializer;

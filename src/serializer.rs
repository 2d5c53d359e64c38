//! Pluggable codec between in-memory values and byte payloads.
//!
//! The core treats serialization as an opaque boundary: the
//! cache/queue/bus contracts are generic over this trait and never assume a
//! particular wire format. `warden` ships exactly one reference
//! implementation, [`JsonSerializer`], backed by `serde_json`, which is
//! enough to exercise the generic contracts without taking a position on
//! the wire format real providers would use.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CoreError;

/// Opaque codec: `encode(value) -> bytes`, `decode(bytes) -> value`.
pub trait Serializer: Send + Sync + std::fmt::Debug {
    /// Encode a value into its byte representation.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CoreError>;

    /// Decode a byte representation back into a value of type `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CoreError>;
}

/// JSON-backed reference [`Serializer`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Construct a new JSON serializer.
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(value).map_err(|e| CoreError::serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CoreError> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::serialization(e.to_string()))
    }
}

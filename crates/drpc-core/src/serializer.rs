//! Pluggable message serialization.
//!
//! The runtime only moves opaque bytes; a [`Serializer`] turns an
//! [`RpcMessage`] into a frame body and back.

use crate::error::{Result, RpcError};
use crate::protocol::RpcMessage;

/// Converts messages to and from frame bodies.
pub trait Serializer: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn serialize(&self, message: &RpcMessage) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<RpcMessage>;
}

/// JSON encoding via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, message: &RpcMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<RpcMessage> {
        serde_json::from_slice(bytes).map_err(|e| RpcError::Serialization {
            message: format!("Failed to decode frame body: {}", e),
            source: Some(e),
        })
    }
}

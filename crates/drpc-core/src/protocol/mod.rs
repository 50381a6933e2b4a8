//! Shared protocol types and framing.
//!
//! Every frame body is one serialized [`RpcMessage`]: either a request
//! travelling consumer → provider or a response travelling back.
//!
//! ```text
//! [u32 BE: len][serializer output of len bytes]
//! ```

pub mod codec;

pub use codec::{encode_frame, write_frame, FrameDecoder, Frames};

use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single remote call. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    id: String,
    service_name: String,
    method_name: String,
    #[serde(default)]
    args: Vec<Value>,
    /// Set when the caller will not wait; the provider sends no response.
    #[serde(default, skip_serializing_if = "is_false")]
    one_way: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl RpcRequest {
    /// Create a request with a fresh identifier.
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            service_name,
            method_name,
            args,
        )
    }

    /// Create a request with an explicit identifier.
    pub fn with_id(
        id: impl Into<String>,
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            service_name: service_name.into(),
            method_name: method_name.into(),
            args,
            one_way: false,
        }
    }

    /// Mark the request as not expecting a response.
    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    /// Consume the request, returning its arguments.
    pub fn into_args(self) -> Vec<Value> {
        self.args
    }
}

/// Outcome of a call, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFault>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create a fault response.
    pub fn failure(id: impl Into<String>, fault: RpcFault) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(fault),
        }
    }

    /// Create a fault response from a runtime error.
    pub fn from_error(id: impl Into<String>, err: &RpcError) -> Self {
        Self::failure(id, RpcFault::from(err))
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Turn the response into the caller-facing result.
    ///
    /// A fault becomes [`RpcError::InvocationFailure`]. A success without a
    /// payload yields `Value::Null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(fault) => Err(RpcError::InvocationFailure {
                code: fault.code,
                message: fault.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Wire form of an error carried inside a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: i32,
    pub message: String,
}

impl From<&RpcError> for RpcFault {
    fn from(err: &RpcError) -> Self {
        Self {
            code: err.to_rpc_error_code(),
            message: err.to_string(),
        }
    }
}

/// Frame body: a request or a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
}

impl From<RpcRequest> for RpcMessage {
    fn from(request: RpcRequest) -> Self {
        RpcMessage::Request(request)
    }
}

impl From<RpcResponse> for RpcMessage {
    fn from(response: RpcResponse) -> Self {
        RpcMessage::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RpcRequest::new("Greeter", "greet", vec![json!("alice")]);
        let b = RpcRequest::new("Greeter", "greet", vec![json!("alice")]);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.service_name(), "Greeter");
        assert_eq!(a.args(), &[json!("alice")]);
    }

    #[test]
    fn test_message_is_tagged() {
        let msg = RpcMessage::from(RpcResponse::success("1", json!("ok")));
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"kind\":\"response\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_one_way_flag_round_trips() {
        let sync = RpcRequest::new("Greeter", "greet", vec![]);
        let json = serde_json::to_string(&RpcMessage::from(sync)).unwrap();
        assert!(!json.contains("one_way"));

        let oneway = RpcRequest::new("Greeter", "greet", vec![]).one_way();
        let json = serde_json::to_string(&RpcMessage::from(oneway)).unwrap();
        match serde_json::from_str::<RpcMessage>(&json).unwrap() {
            RpcMessage::Request(request) => assert!(request.is_one_way()),
            other => panic!("Expected request, got: {:?}", other),
        }
    }

    #[test]
    fn test_failure_into_result() {
        let fault = RpcFault::from(&RpcError::Service("boom".into()));
        let resp = RpcResponse::failure("7", fault);
        assert!(resp.is_failure());

        match resp.into_result() {
            Err(RpcError::InvocationFailure { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "boom");
            }
            other => panic!("Expected InvocationFailure, got: {:?}", other),
        }
    }

    #[test]
    fn test_success_without_payload_is_null() {
        let resp = RpcResponse {
            id: "1".into(),
            result: None,
            error: None,
        };
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }
}

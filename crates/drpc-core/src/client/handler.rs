//! Inbound frame handling on the consumer side.

use super::correlator::ResponseCorrelator;
use crate::error::{Result, RpcError};
use crate::protocol::RpcMessage;
use crate::serializer::Serializer;
use crate::transport::{Connection, FrameHandler};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace};

/// Decodes responses and hands them to the correlator.
///
/// Anything other than a well-formed response closes the connection.
pub struct ResponseHandler {
    correlator: Arc<ResponseCorrelator>,
    serializer: Arc<dyn Serializer>,
}

impl ResponseHandler {
    pub fn new(correlator: Arc<ResponseCorrelator>, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            correlator,
            serializer,
        }
    }
}

#[async_trait::async_trait]
impl FrameHandler for ResponseHandler {
    async fn on_frame(&self, connection: &Connection, frame: Bytes) -> Result<()> {
        let message = self
            .serializer
            .deserialize(&frame)
            .map_err(|e| RpcError::protocol(format!("undecodable frame: {}", e)))?;

        match message {
            RpcMessage::Response(response) => {
                trace!("Response {} from {}", response.id, connection.address());
                self.correlator.put(response);
                Ok(())
            }
            RpcMessage::Request(request) => Err(RpcError::protocol(format!(
                "provider {} sent a request ({})",
                connection.address(),
                request.id()
            ))),
        }
    }

    fn on_closed(&self, connection: &Connection) {
        debug!("Provider connection {} closed", connection.address());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, RpcRequest, RpcResponse};
    use crate::serializer::JsonSerializer;
    use serde_json::json;
    use std::time::Duration;

    fn pair(correlator: Arc<ResponseCorrelator>) -> (Connection, Connection) {
        let (a, b) = tokio::io::duplex(1024);
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let client = Connection::spawn(
            a,
            "provider",
            Arc::new(ResponseHandler::new(correlator, serializer.clone())),
        );
        let provider = Connection::spawn(
            b,
            "client",
            Arc::new(ResponseHandler::new(
                Arc::new(ResponseCorrelator::new()),
                serializer,
            )),
        );
        (client, provider)
    }

    #[tokio::test]
    async fn test_response_reaches_correlator() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let (_client, provider) = pair(correlator.clone());
        correlator.register("r1");

        provider
            .send_message(&JsonSerializer, &RpcResponse::success("r1", json!(42)).into())
            .unwrap();

        let got = correlator
            .await_and_remove("r1", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(got.result, Some(json!(42)));
    }

    #[tokio::test]
    async fn test_garbage_closes_connection() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let (client, provider) = pair(correlator);

        provider.send(encode_frame(b"not json").unwrap()).unwrap();

        for _ in 0..100 {
            if client.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("client connection stayed open");
    }

    #[tokio::test]
    async fn test_request_on_client_side_is_a_violation() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let (client, provider) = pair(correlator);

        provider
            .send_message(&JsonSerializer, &RpcRequest::new("S", "m", vec![]).into())
            .unwrap();

        for _ in 0..100 {
            if client.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("client connection stayed open");
    }
}

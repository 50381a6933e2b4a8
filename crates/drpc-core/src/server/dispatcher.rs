//! Inbound request dispatch.
//!
//! Every decoded request runs on its own task: server filters, binding
//! lookup, invocation, then the response goes back on the connection the
//! request arrived on. Failures of a single call become fault responses;
//! only undecodable frames close the connection.

use super::bindings::ServiceBindings;
use crate::error::{Result, RpcError};
use crate::filter::{ServerCall, ServerFilterChain};
use crate::protocol::{RpcMessage, RpcRequest, RpcResponse};
use crate::serializer::Serializer;
use crate::transport::{Connection, FrameHandler};
use bytes::Bytes;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Frame handler for provider-side connections. Cheap to clone.
#[derive(Clone)]
pub struct ServerDispatcher {
    bindings: Arc<ServiceBindings>,
    filters: Arc<ServerFilterChain>,
    serializer: Arc<dyn Serializer>,
}

impl ServerDispatcher {
    pub fn new(
        bindings: Arc<ServiceBindings>,
        filters: ServerFilterChain,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            bindings,
            filters: Arc::new(filters),
            serializer,
        }
    }

    /// Produce the response for one request.
    pub async fn process(&self, request: RpcRequest, peer: &str) -> RpcResponse {
        {
            let mut call = ServerCall::new(&request, peer);
            if let Some(response) = self.filters.apply(&mut call) {
                debug!("Request {} answered by server filter", request.id());
                return response;
            }
        }

        let Some(service) = self.bindings.get(request.service_name()) else {
            let err = RpcError::ServiceNotFound {
                service: request.service_name().to_string(),
            };
            return RpcResponse::from_error(request.id(), &err);
        };

        let id = request.id().to_string();
        let method = request.method_name().to_string();
        let invocation = service.invoke(&method, request.into_args());

        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(result)) => RpcResponse::success(id, result),
            Ok(Err(e)) => {
                debug!("{}.{} failed: {}", service.implementation_name(), method, e);
                RpcResponse::from_error(id, &e)
            }
            Err(_) => {
                error!("{}.{} panicked", service.implementation_name(), method);
                let err = RpcError::InvocationFailure {
                    code: -32603,
                    message: format!("{} panicked", method),
                };
                RpcResponse::from_error(id, &err)
            }
        }
    }
}

#[async_trait::async_trait]
impl FrameHandler for ServerDispatcher {
    async fn on_frame(&self, connection: &Connection, frame: Bytes) -> Result<()> {
        let message = self
            .serializer
            .deserialize(&frame)
            .map_err(|e| RpcError::protocol(format!("undecodable frame: {}", e)))?;

        let request = match message {
            RpcMessage::Request(request) => request,
            RpcMessage::Response(response) => {
                return Err(RpcError::protocol(format!(
                    "consumer {} sent a response ({})",
                    connection.address(),
                    response.id
                )));
            }
        };

        let dispatcher = self.clone();
        let connection = connection.clone();
        tokio::spawn(async move {
            let one_way = request.is_one_way();
            let response = dispatcher.process(request, connection.address()).await;
            if one_way {
                return;
            }
            let id = response.id.clone();
            if let Err(e) =
                connection.send_message(dispatcher.serializer.as_ref(), &RpcMessage::from(response))
            {
                warn!("Dropping response {} for {}: {}", id, connection.address(), e);
            }
        });
        Ok(())
    }

    fn on_closed(&self, connection: &Connection) {
        debug!("Consumer connection {} closed", connection.address());
    }
}

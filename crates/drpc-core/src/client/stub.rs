//! Typed call surface for one subscribed service.

use super::ClientContext;
use crate::error::{Result, RpcError};
use crate::filter::ClientCall;
use crate::protocol::{RpcMessage, RpcRequest};
use crate::service::ServiceInterface;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A service interface plus how calls to it wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribedService {
    interface: ServiceInterface,
    sync: bool,
}

impl SubscribedService {
    /// Calls wait for the provider's response.
    pub fn sync(interface: ServiceInterface) -> Self {
        Self {
            interface,
            sync: true,
        }
    }

    /// Calls return as soon as the request is queued for sending.
    pub fn fire_and_forget(interface: ServiceInterface) -> Self {
        Self {
            interface,
            sync: false,
        }
    }

    pub fn interface(&self) -> &ServiceInterface {
        &self.interface
    }

    pub fn name(&self) -> &str {
        &self.interface.name
    }

    pub fn is_sync(&self) -> bool {
        self.sync
    }
}

/// Client handle for one subscribed service. Cheap to clone.
#[derive(Clone)]
pub struct ServiceStub {
    context: Arc<ClientContext>,
    service: SubscribedService,
}

impl ServiceStub {
    pub(crate) fn new(context: Arc<ClientContext>, service: SubscribedService) -> Self {
        Self { context, service }
    }

    pub fn service(&self) -> &SubscribedService {
        &self.service
    }

    /// Invoke `method` in the service's own mode.
    ///
    /// Synchronous services return `Some(result)`; fire-and-forget services
    /// return `None` once the request is queued.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
        self.dispatch(method, args, self.service.is_sync()).await
    }

    /// Invoke synchronously and deserialize the result.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<R> {
        let value = self.dispatch(method, args, true).await?;
        Ok(serde_json::from_value(value.unwrap_or(Value::Null))?)
    }

    /// Send without waiting, whatever the service's mode.
    pub async fn notify(&self, method: &str, args: Vec<Value>) -> Result<()> {
        self.dispatch(method, args, false).await.map(|_| ())
    }

    async fn dispatch(&self, method: &str, args: Vec<Value>, wait: bool) -> Result<Option<Value>> {
        let ctx = &self.context;
        let interface = self.service.interface();
        if !interface.has_method(method) {
            return Err(RpcError::MethodNotFound {
                service: interface.name.clone(),
                method: method.to_string(),
            });
        }

        let mut request = RpcRequest::new(&interface.name, method, args);
        if !wait {
            request = request.one_way();
        }
        let connection = {
            let candidates = ctx.connections.get_connections(&interface.name);
            let mut call = ClientCall::new(&request, candidates);
            ctx.filters.apply(&mut call);
            if !call.diagnostics.is_empty() {
                debug!("Request {}: {}", request.id(), call.diagnostics.join("; "));
            }
            ctx.router.select(&interface.name, &call.candidates)?
        };

        let id = request.id().to_string();
        if wait {
            ctx.correlator.register(&id);
        }
        let message = RpcMessage::from(request);
        if let Err(e) = connection.send_message(ctx.serializer.as_ref(), &message) {
            ctx.correlator.forget(&id);
            return Err(e);
        }
        debug!(
            "Sent {}.{} ({}) to {}",
            interface.name,
            method,
            id,
            connection.address()
        );

        if !wait {
            return Ok(None);
        }

        let response = ctx
            .correlator
            .await_and_remove(&id, ctx.config.request_timeout())
            .await?;
        response.into_result().map(Some)
    }
}

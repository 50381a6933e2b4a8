//! Server-side filter chain over inbound requests.

use crate::error::RpcError;
use crate::protocol::{RpcRequest, RpcResponse};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// State a server filter sees for one inbound request.
pub struct ServerCall<'a> {
    pub request: &'a RpcRequest,
    /// Address of the peer that sent the request.
    pub peer: &'a str,
    /// Scratch values filters can leave for later filters.
    pub attributes: BTreeMap<String, String>,
}

impl<'a> ServerCall<'a> {
    pub fn new(request: &'a RpcRequest, peer: &'a str) -> Self {
        Self {
            request,
            peer,
            attributes: BTreeMap::new(),
        }
    }
}

/// What the chain should do after a filter ran.
#[derive(Debug)]
pub enum FilterDecision {
    Continue,
    /// Stop here and send this response instead of invoking the service.
    Respond(RpcResponse),
}

/// One step of the server chain.
pub trait ServerFilter: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn filter(&self, call: &mut ServerCall<'_>) -> FilterDecision;
}

/// Ordered server filters.
#[derive(Clone, Default)]
pub struct ServerFilterChain {
    filters: Vec<Arc<dyn ServerFilter>>,
}

impl fmt::Debug for ServerFilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}

impl ServerFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain a server gets unless one is configured: request logging only.
    pub fn with_defaults() -> Self {
        Self::new().with_filter(ServerLogFilter)
    }

    pub fn add_filter(&mut self, filter: impl ServerFilter) {
        self.filters.push(Arc::new(filter));
    }

    pub fn with_filter(mut self, filter: impl ServerFilter) -> Self {
        self.add_filter(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run filters in order until one answers the request.
    ///
    /// Returns the short-circuit response, or `None` when every filter let
    /// the request through.
    pub fn apply(&self, call: &mut ServerCall<'_>) -> Option<RpcResponse> {
        for filter in &self.filters {
            if let FilterDecision::Respond(response) = filter.filter(call) {
                return Some(response);
            }
        }
        None
    }
}

/// Logs every inbound request.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerLogFilter;

impl ServerFilter for ServerLogFilter {
    fn name(&self) -> &'static str {
        "server-log"
    }

    fn filter(&self, call: &mut ServerCall<'_>) -> FilterDecision {
        debug!(
            "Request {} from {}: {}.{}",
            call.request.id(),
            call.peer,
            call.request.service_name(),
            call.request.method_name()
        );
        FilterDecision::Continue
    }
}

/// Rejects requests for services outside an allow-list.
#[derive(Debug, Default, Clone)]
pub struct ServiceAllowListFilter {
    allowed: HashSet<String>,
}

impl ServiceAllowListFilter {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: services.into_iter().map(Into::into).collect(),
        }
    }
}

impl ServerFilter for ServiceAllowListFilter {
    fn name(&self) -> &'static str {
        "service-allow-list"
    }

    fn filter(&self, call: &mut ServerCall<'_>) -> FilterDecision {
        let service = call.request.service_name();
        if self.allowed.contains(service) {
            return FilterDecision::Continue;
        }
        let error = RpcError::AccessDenied {
            service: service.to_string(),
        };
        FilterDecision::Respond(RpcResponse::from_error(call.request.id(), &error))
    }
}

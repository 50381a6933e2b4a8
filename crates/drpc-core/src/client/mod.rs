//! Consumer side of the runtime.
//!
//! An [`RpcClient`] owns one [`ClientContext`]: the connection manager,
//! router, correlator, filter chain and serializer every stub of that
//! client shares. Subscribing to a service starts a watcher task that feeds
//! registry events into the connection manager and refreshes the router.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = RpcClientBuilder::new(registry).build()?;
//! let greeter = client
//!     .subscribe_service(SubscribedService::sync(greeter_interface()))
//!     .await?;
//! let reply: String = greeter.call("greet", vec![json!("alice")]).await?;
//! ```

pub mod connection_manager;
pub mod correlator;
pub mod handler;
pub mod stub;

pub use connection_manager::ConnectionManager;
pub use correlator::ResponseCorrelator;
pub use handler::ResponseHandler;
pub use stub::{ServiceStub, SubscribedService};

use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::filter::{ClientFilter, ClientFilterChain};
use crate::registry::{ProviderDescriptor, Registry};
use crate::router::{Router, RouterKind, SelectionPolicy};
use crate::serializer::{JsonSerializer, Serializer};
use crate::transport::{Connector, TcpConnector};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-client state shared by every stub.
pub struct ClientContext {
    pub(crate) config: ClientConfig,
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) connections: Arc<ConnectionManager>,
    pub(crate) router: Arc<Router>,
    pub(crate) correlator: Arc<ResponseCorrelator>,
    pub(crate) filters: ClientFilterChain,
}

impl ClientContext {
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn correlator(&self) -> &Arc<ResponseCorrelator> {
        &self.correlator
    }

    /// Apply one provider-list change: reconcile connections, then refresh
    /// the router cache.
    pub async fn apply_update(&self, service_name: &str, providers: &[ProviderDescriptor]) {
        self.connections
            .on_service_updated(service_name, providers)
            .await;
        self.router.refresh(service_name);
    }
}

/// Builder for [`RpcClient`].
pub struct RpcClientBuilder {
    registry: Arc<dyn Registry>,
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    serializer: Arc<dyn Serializer>,
    filters: ClientFilterChain,
    policy: Option<Box<dyn SelectionPolicy>>,
}

impl RpcClientBuilder {
    /// Start a builder against the registry that lists providers.
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            config: ClientConfig::default(),
            connector: None,
            serializer: Arc::new(JsonSerializer),
            filters: ClientFilterChain::new(),
            policy: None,
        }
    }

    /// Replace the whole runtime configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Bounded wait for synchronous calls.
    ///
    /// Default: 3000 ms
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Built-in selection policy.
    ///
    /// Default: round robin
    pub fn router(mut self, kind: RouterKind) -> Self {
        self.config.router = kind;
        self
    }

    /// Custom selection policy. Overrides [`router`](Self::router).
    pub fn selection_policy(mut self, policy: Box<dyn SelectionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Transport used to reach providers.
    ///
    /// Default: [`TcpConnector`] with the configured connect timeout
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Default: [`JsonSerializer`]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Append a client filter.
    pub fn filter(mut self, filter: impl ClientFilter) -> Self {
        self.filters.add_filter(filter);
        self
    }

    pub fn build(self) -> Result<RpcClient> {
        if self.config.request_timeout_ms == 0 {
            return Err(RpcError::Config {
                message: "request timeout must be greater than zero".to_string(),
            });
        }

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TcpConnector::new(self.config.connect_timeout())),
        };
        let correlator = Arc::new(ResponseCorrelator::for_request_timeout(
            self.config.request_timeout(),
        ));
        let handler = Arc::new(ResponseHandler::new(
            correlator.clone(),
            self.serializer.clone(),
        ));
        let connections = Arc::new(ConnectionManager::new(connector, handler));
        let policy = self.policy.unwrap_or_else(|| self.config.router.policy());
        let router = Arc::new(Router::with_policy(connections.clone(), policy));

        info!(
            "RPC client '{}' ready (serializer: {}, timeout: {:?})",
            self.config.application_name,
            self.serializer.name(),
            self.config.request_timeout()
        );

        Ok(RpcClient {
            context: Arc::new(ClientContext {
                config: self.config,
                registry: self.registry,
                serializer: self.serializer,
                connections,
                router,
                correlator,
                filters: self.filters,
            }),
            watchers: Mutex::new(HashMap::new()),
        })
    }
}

/// Consumer entry point.
pub struct RpcClient {
    context: Arc<ClientContext>,
    /// Registry watcher task per subscribed service name.
    watchers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RpcClient {
    pub fn builder(registry: Arc<dyn Registry>) -> RpcClientBuilder {
        RpcClientBuilder::new(registry)
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.context
    }

    fn lock_watchers(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to a service and get a stub for it.
    ///
    /// The first subscription to a name waits for the registry's current
    /// provider list, so the stub is routable on return if any provider is
    /// up. Later subscriptions to the same name share the running watcher.
    pub async fn subscribe_service(&self, service: SubscribedService) -> Result<ServiceStub> {
        let name = service.name().to_string();
        if self.lock_watchers().contains_key(&name) {
            return Ok(ServiceStub::new(self.context.clone(), service));
        }

        let mut events = self.context.registry.subscribe(&name).await?;
        if let Some(event) = events.next().await {
            self.context
                .apply_update(&event.service_name, &event.providers)
                .await;
        }

        let context = self.context.clone();
        let watched = name.clone();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                debug!(
                    "Provider list of {} changed: {} provider(s)",
                    event.service_name,
                    event.providers.len()
                );
                context
                    .apply_update(&event.service_name, &event.providers)
                    .await;
            }
            warn!("Registry subscription for {} ended", watched);
        });

        let mut watchers = self.lock_watchers();
        if watchers.contains_key(&name) {
            // Lost a race with a concurrent subscribe; theirs is already live.
            watcher.abort();
        } else {
            watchers.insert(name.clone(), watcher);
            info!("Subscribed to {}", name);
        }
        Ok(ServiceStub::new(self.context.clone(), service))
    }

    /// Names of services with a running registry watcher.
    pub fn subscribed_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_watchers().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop all watchers and close every provider connection.
    pub async fn shutdown(&self) {
        let watchers: Vec<JoinHandle<()>> = self.lock_watchers().drain().map(|(_, h)| h).collect();
        for watcher in watchers {
            watcher.abort();
        }
        self.context.connections.close_all().await;
        info!("RPC client '{}' shut down", self.context.config.application_name);
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        for (_, watcher) in self.lock_watchers().drain() {
            watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::service::ServiceInterface;
    use serde_json::json;

    fn greeter() -> SubscribedService {
        SubscribedService::sync(ServiceInterface::new("Greeter", ["greet"]))
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = RpcClientBuilder::new(Arc::new(MemoryRegistry::new()))
            .request_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(RpcError::Config { .. })));
    }

    #[test]
    fn test_long_timeout_keeps_tombstones_long_enough() {
        let client = RpcClientBuilder::new(Arc::new(MemoryRegistry::new()))
            .request_timeout(Duration::from_secs(120))
            .build()
            .unwrap();
        assert!(client.context().correlator().ttl() > Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_unknown_method_fails_before_routing() {
        let client = RpcClient::builder(Arc::new(MemoryRegistry::new()))
            .build()
            .unwrap();
        let stub = client.subscribe_service(greeter()).await.unwrap();

        let result = stub.invoke("shout", vec![json!("x")]).await;
        assert!(matches!(result, Err(RpcError::MethodNotFound { .. })));
    }

    #[tokio::test]
    async fn test_no_providers_means_no_available_connection() {
        let client = RpcClient::builder(Arc::new(MemoryRegistry::new()))
            .build()
            .unwrap();
        let stub = client.subscribe_service(greeter()).await.unwrap();

        let result = stub.invoke("greet", vec![json!("alice")]).await;
        assert!(matches!(result, Err(RpcError::NoAvailableConnection { .. })));
        assert_eq!(client.context().correlator().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_twice_shares_watcher() {
        let registry = Arc::new(MemoryRegistry::new());
        let client = RpcClient::builder(registry.clone()).build().unwrap();
        client.subscribe_service(greeter()).await.unwrap();
        client
            .subscribe_service(SubscribedService::fire_and_forget(ServiceInterface::new(
                "Greeter",
                ["greet"],
            )))
            .await
            .unwrap();

        assert_eq!(client.subscribed_services(), vec!["Greeter".to_string()]);
        client.shutdown().await;
        assert!(client.subscribed_services().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_skipped() {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register(&ProviderDescriptor::new("Greeter", "127.0.0.1:1", "test"))
            .await
            .unwrap();
        let client = RpcClient::builder(registry).build().unwrap();
        let stub = client.subscribe_service(greeter()).await.unwrap();

        assert!(client.context().connections().get_connections("Greeter").is_empty());
        let result = stub.invoke("greet", vec![json!("alice")]).await;
        assert!(matches!(result, Err(RpcError::NoAvailableConnection { .. })));
    }
}

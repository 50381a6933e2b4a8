//! Provider side of the runtime.
//!
//! [`RpcServer`] listens on TCP, wraps every accepted socket in a
//! [`Connection`] whose frames go to the [`ServerDispatcher`], and announces
//! registered services through the [`RegistrationManager`].
//!
//! # Shutdown
//!
//! The accept loop stops on a `oneshot` signal from
//! [`RpcServer::shutdown`] (or when the server is dropped) and closes every
//! connection it accepted.

pub mod bindings;
pub mod dispatcher;
pub mod executor;
pub mod registration;

pub use bindings::ServiceBindings;
pub use dispatcher::ServerDispatcher;
pub use executor::TaskExecutor;
pub use registration::RegistrationManager;

use crate::config::{ServerConfig, ServerDefaults};
use crate::error::{Result, RpcError};
use crate::filter::{ServerFilter, ServerFilterChain};
use crate::registry::{ProviderDescriptor, Registry};
use crate::serializer::{JsonSerializer, Serializer};
use crate::service::RpcService;
use crate::transport::Connection;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Per-server state.
pub struct ServerContext {
    config: ServerConfig,
    address: String,
    bindings: Arc<ServiceBindings>,
    registration: RegistrationManager,
}

impl ServerContext {
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// `host:port` announced to the registry.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn bindings(&self) -> &Arc<ServiceBindings> {
        &self.bindings
    }

    pub fn registration(&self) -> &RegistrationManager {
        &self.registration
    }
}

/// Builder for [`RpcServer`].
pub struct RpcServerBuilder {
    registry: Arc<dyn Registry>,
    config: ServerConfig,
    serializer: Arc<dyn Serializer>,
    filters: ServerFilterChain,
}

impl RpcServerBuilder {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            config: ServerConfig::default(),
            serializer: Arc::new(JsonSerializer),
            filters: ServerFilterChain::with_defaults(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: `127.0.0.1`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Default: `0` (OS-assigned)
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    /// Default: [`JsonSerializer`]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Append a server filter after the ones already configured.
    pub fn filter(mut self, filter: impl ServerFilter) -> Self {
        self.filters.add_filter(filter);
        self
    }

    /// Replace the whole server filter chain.
    ///
    /// Default: [`ServerFilterChain::with_defaults`]
    pub fn filters(mut self, filters: ServerFilterChain) -> Self {
        self.filters = filters;
        self
    }

    /// Bind the listener and start accepting.
    pub async fn start(self) -> Result<RpcServer> {
        if self.config.registration_workers == 0 {
            return Err(RpcError::Config {
                message: "registration_workers must be at least 1".to_string(),
            });
        }

        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| RpcError::Io {
            message: format!("Failed to bind {}", bind_addr),
            source: Some(e),
        })?;
        let local_addr = listener.local_addr()?;
        let advertise_host = self
            .config
            .advertise_host
            .clone()
            .unwrap_or_else(|| self.config.host.clone());
        let address = format!("{}:{}", advertise_host, local_addr.port());

        let bindings = Arc::new(ServiceBindings::new());
        let executor = TaskExecutor::new(
            "registration",
            self.config.registration_workers,
            self.config.registration_backlog,
        );
        let registration = RegistrationManager::new(
            self.registry,
            bindings.clone(),
            executor,
            address.clone(),
            self.config.application_name.clone(),
        );
        let dispatcher = ServerDispatcher::new(bindings.clone(), self.filters, self.serializer);

        info!(
            "RPC server '{}' listening on {} (advertised as {})",
            self.config.application_name, local_addr, address
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(accept_loop(listener, dispatcher, shutdown_rx));

        Ok(RpcServer {
            context: Arc::new(ServerContext {
                config: self.config,
                address,
                bindings,
                registration,
            }),
            local_addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

/// Provider entry point. Dropping it stops the listener.
pub struct RpcServer {
    context: Arc<ServerContext>,
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RpcServer {
    pub fn builder(registry: Arc<dyn Registry>) -> RpcServerBuilder {
        RpcServerBuilder::new(registry)
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Socket address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `host:port` announced to the registry.
    pub fn address(&self) -> &str {
        &self.context.address
    }

    /// Bind and announce a service implementation.
    ///
    /// Fails with [`RpcError::AmbiguousServiceInterface`] unless the
    /// implementation declares exactly one interface.
    pub async fn register_service(&self, service: Arc<dyn RpcService>) -> Result<()> {
        self.context.registration.register(service).await
    }

    /// Withdraw and unbind a service implementation.
    pub async fn unregister_service(&self, service: &dyn RpcService) -> Result<()> {
        self.context.registration.unregister(service).await
    }

    pub fn registered_services(&self) -> Vec<ProviderDescriptor> {
        self.context.registration.registered_services()
    }

    /// Wait for pending registration work.
    pub async fn wait_idle(&self) {
        self.context.registration.wait_idle().await;
    }

    /// Stop accepting and close every accepted connection.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: ServerDispatcher,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut connections: Vec<Connection> = Vec::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("RPC server shutting down");
                break;
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        connections.retain(|conn| !conn.is_closed());
                        if connections.len() >= ServerDefaults::MAX_CONNECTIONS {
                            warn!(
                                "Rejecting connection from {}: at max capacity ({})",
                                peer_addr,
                                ServerDefaults::MAX_CONNECTIONS
                            );
                            continue;
                        }
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Could not set TCP_NODELAY for {}: {}", peer_addr, e);
                        }
                        debug!("Connection from {}", peer_addr);
                        connections.push(Connection::spawn(
                            stream,
                            peer_addr.to_string(),
                            Arc::new(dispatcher.clone()),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        }
    }

    for conn in connections {
        conn.close();
    }
}

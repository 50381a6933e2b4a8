//! drpc Core - registry-driven RPC runtime.
//!
//! Consumers call remote services through typed stubs; providers bind
//! implementations and announce them to a service registry. In between sit
//! a length-prefixed wire codec, a pooled connection manager, client and
//! server filter chains, a pluggable router and a response correlator.
//!
//! # Example
//!
//! ```rust,ignore
//! use drpc_core::{MemoryRegistry, RpcClient, RpcServer, ServiceInterface, SubscribedService};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> drpc_core::Result<()> {
//!     let registry = Arc::new(MemoryRegistry::new());
//!
//!     let server = RpcServer::builder(registry.clone()).start().await?;
//!     server.register_service(Arc::new(GreeterImpl)).await?;
//!     server.wait_idle().await;
//!
//!     let client = RpcClient::builder(registry).build()?;
//!     let greeter = client
//!         .subscribe_service(SubscribedService::sync(ServiceInterface::new("Greeter", ["greet"])))
//!         .await?;
//!     let reply: String = greeter.call("greet", vec![json!("alice")]).await?;
//!     println!("{}", reply);
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod serializer;
pub mod server;
pub mod service;
pub mod transport;

// Re-export commonly used types
pub use client::{
    ClientContext, ConnectionManager, ResponseCorrelator, RpcClient, RpcClientBuilder,
    ServiceStub, SubscribedService,
};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Result, RpcError};
pub use filter::{
    AddressBlocklistFilter, ClientFilter, ClientFilterChain, ClientLogFilter, FilterDecision,
    ServerFilter, ServerFilterChain, ServerLogFilter, ServiceAllowListFilter,
};
pub use protocol::{RpcFault, RpcMessage, RpcRequest, RpcResponse};
pub use registry::{MemoryRegistry, ProviderDescriptor, Registry, ServiceUpdateEvent};
pub use router::{Router, RouterKind, SelectionPolicy};
pub use serializer::{JsonSerializer, Serializer};
pub use server::{RegistrationManager, RpcServer, RpcServerBuilder, ServerContext, ServerDispatcher};
pub use service::{RpcService, ServiceInterface};
pub use transport::{Connection, Connector, FrameHandler, TcpConnector};

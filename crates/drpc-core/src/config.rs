//! Centralized configuration for drpc.
//!
//! Compile-time defaults live as associated constants on small marker
//! structs. Runtime settings live in [`ClientConfig`] and [`ServerConfig`],
//! which deserialize with defaults so an application can load them from
//! whatever file format it already uses.

use crate::router::RouterKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire framing limits.
pub struct WireConfig;

impl WireConfig {
    /// Width of the big-endian length prefix.
    pub const LENGTH_PREFIX_BYTES: usize = 4;
    /// Largest frame body accepted before the peer is considered broken.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    /// Read buffer size per connection.
    pub const READ_CHUNK_SIZE: usize = 8 * 1024;
}

/// Client-side defaults.
pub struct ClientDefaults;

impl ClientDefaults {
    pub const APPLICATION_NAME: &'static str = "drpc-client";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Server-side defaults.
pub struct ServerDefaults;

impl ServerDefaults {
    pub const APPLICATION_NAME: &'static str = "drpc-server";
    pub const BIND_HOST: &'static str = "127.0.0.1";
    pub const PORT: u16 = 0;
    /// Inbound connections accepted at once before new ones are refused.
    pub const MAX_CONNECTIONS: usize = 1024;
}

/// Pending call table housekeeping.
pub struct CorrelatorConfig;

impl CorrelatorConfig {
    /// Minimum age after which an unclaimed response or a tombstone expires.
    /// Clients with a longer request timeout use twice their timeout.
    pub const ENTRY_TTL: Duration = Duration::from_secs(60);

    /// Bound on unclaimed responses and on tombstones, each.
    pub const MAX_ENTRIES: u64 = 100_000;
}

/// Registration executor sizing.
pub struct RegistrationConfig;

impl RegistrationConfig {
    pub const WORKERS: usize = 5;
    pub const BACKLOG: usize = 100;
}

/// Runtime configuration for an [`RpcClient`](crate::client::RpcClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name reported in logs.
    pub application_name: String,
    /// Bounded wait for synchronous calls, in milliseconds.
    pub request_timeout_ms: u64,
    /// Bounded wait when opening a provider connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Connection selection policy.
    pub router: RouterKind,
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_name: ClientDefaults::APPLICATION_NAME.to_string(),
            request_timeout_ms: ClientDefaults::REQUEST_TIMEOUT.as_millis() as u64,
            connect_timeout_ms: ClientDefaults::CONNECT_TIMEOUT.as_millis() as u64,
            router: RouterKind::default(),
        }
    }
}

/// Runtime configuration for an [`RpcServer`](crate::server::RpcServer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Application name written into every provider descriptor.
    pub application_name: String,
    /// Host to bind the listener to.
    pub host: String,
    /// Port to bind (0 = OS-assigned).
    pub port: u16,
    /// Host advertised to the registry. Defaults to `host`.
    pub advertise_host: Option<String>,
    /// Registration worker count.
    pub registration_workers: usize,
    /// Registration queue capacity before the caller runs tasks itself.
    pub registration_backlog: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            application_name: ServerDefaults::APPLICATION_NAME.to_string(),
            host: ServerDefaults::BIND_HOST.to_string(),
            port: ServerDefaults::PORT,
            advertise_host: None,
            registration_workers: RegistrationConfig::WORKERS,
            registration_backlog: RegistrationConfig::BACKLOG,
        }
    }
}

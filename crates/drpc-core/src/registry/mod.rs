//! Service registry seam.
//!
//! Providers announce a [`ProviderDescriptor`] per service; consumers
//! subscribe to a service name and receive the full provider list every time
//! it changes. The concrete backend (ZooKeeper, etcd, ...) sits behind the
//! [`Registry`] trait; [`MemoryRegistry`] serves single-process deployments
//! and tests.

pub mod memory;

pub use memory::MemoryRegistry;

use crate::error::Result;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute keys written by the registration manager.
pub struct ProviderAttributes;

impl ProviderAttributes {
    pub const TYPE: &'static str = "type";
    pub const TYPE_PROVIDER: &'static str = "provider";
}

/// One remote endpoint offering one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub service_name: String,
    /// `host:port` the provider listens on.
    pub address: String,
    pub application_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ProviderDescriptor {
    pub fn new(
        service_name: impl Into<String>,
        address: impl Into<String>,
        application_name: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            address: address.into(),
            application_name: application_name.into(),
            created_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The provider list of a service changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUpdateEvent {
    pub service_name: String,
    pub providers: Vec<ProviderDescriptor>,
}

/// Infinite stream of provider-list changes for one service.
pub type ServiceUpdateStream = BoxStream<'static, ServiceUpdateEvent>;

/// Registry backend.
#[async_trait::async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Announce a provider. Re-registering the same address replaces it.
    async fn register(&self, provider: &ProviderDescriptor) -> Result<()>;

    /// Withdraw a provider.
    async fn unregister(&self, provider: &ProviderDescriptor) -> Result<()>;

    /// Watch a service.
    ///
    /// The first event carries the current provider list; every later event
    /// carries the list after a change. A new subscription always starts
    /// from the current state.
    async fn subscribe(&self, service_name: &str) -> Result<ServiceUpdateStream>;
}

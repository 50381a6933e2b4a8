//! In-process registry backed by one `watch` channel per service.

use super::{ProviderDescriptor, Registry, ServiceUpdateEvent, ServiceUpdateStream};
use crate::error::{Result, RpcError};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

type ProviderList = Vec<ProviderDescriptor>;

/// Registry that lives inside the current process.
///
/// Useful when provider and consumer share a process, and as the test
/// double for the registry seam. Subscribers only ever see the latest list,
/// intermediate states may be coalesced.
#[derive(Default)]
pub struct MemoryRegistry {
    services: Mutex<HashMap<String, watch::Sender<ProviderList>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_services(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, watch::Sender<ProviderList>>>> {
        self.services.lock().map_err(|_| RpcError::Registry {
            message: "Failed to acquire registry lock".to_string(),
        })
    }

    /// Current providers of a service.
    pub fn providers(&self, service_name: &str) -> Result<ProviderList> {
        let services = self.lock_services()?;
        Ok(services
            .get(service_name)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, provider: &ProviderDescriptor) -> Result<()> {
        let mut services = self.lock_services()?;
        let tx = services
            .entry(provider.service_name.clone())
            .or_insert_with(|| watch::channel(Vec::new()).0);

        tx.send_modify(|providers| {
            providers.retain(|p| p.address != provider.address);
            providers.push(provider.clone());
        });

        debug!(
            "Registered provider {} for {}",
            provider.address, provider.service_name
        );
        Ok(())
    }

    async fn unregister(&self, provider: &ProviderDescriptor) -> Result<()> {
        let services = self.lock_services()?;
        if let Some(tx) = services.get(&provider.service_name) {
            tx.send_if_modified(|providers| {
                let before = providers.len();
                providers.retain(|p| p.address != provider.address);
                providers.len() != before
            });
            debug!(
                "Unregistered provider {} for {}",
                provider.address, provider.service_name
            );
        }
        Ok(())
    }

    async fn subscribe(&self, service_name: &str) -> Result<ServiceUpdateStream> {
        let rx = {
            let mut services = self.lock_services()?;
            services
                .entry(service_name.to_string())
                .or_insert_with(|| watch::channel(Vec::new()).0)
                .subscribe()
        };

        let service_name = service_name.to_string();
        let stream = futures::stream::unfold((rx, true), move |(mut rx, first)| {
            let service_name = service_name.clone();
            async move {
                if !first {
                    // The sender lives as long as the registry entry.
                    rx.changed().await.ok()?;
                }
                let providers = rx.borrow_and_update().clone();
                Some((
                    ServiceUpdateEvent {
                        service_name,
                        providers,
                    },
                    (rx, false),
                ))
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider(addr: &str) -> ProviderDescriptor {
        ProviderDescriptor::new("Greeter", addr, "test-app")
    }

    #[tokio::test]
    async fn test_subscribe_starts_from_current_state() {
        let registry = MemoryRegistry::new();
        registry.register(&provider("127.0.0.1:1")).await.unwrap();

        let mut stream = registry.subscribe("Greeter").await.unwrap();
        let event = stream.next().await.unwrap();

        assert_eq!(event.service_name, "Greeter");
        assert_eq!(event.providers.len(), 1);
        assert_eq!(event.providers[0].address, "127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_subscribe_unknown_service_yields_empty_list() {
        let registry = MemoryRegistry::new();
        let mut stream = registry.subscribe("Nobody").await.unwrap();
        assert!(stream.next().await.unwrap().providers.is_empty());
    }

    #[tokio::test]
    async fn test_changes_are_delivered() {
        let registry = MemoryRegistry::new();
        let mut stream = registry.subscribe("Greeter").await.unwrap();
        assert!(stream.next().await.unwrap().providers.is_empty());

        registry.register(&provider("127.0.0.1:1")).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.providers.len(), 1);

        registry.unregister(&provider("127.0.0.1:1")).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert!(event.providers.is_empty());
    }

    #[tokio::test]
    async fn test_reregister_same_address_replaces() {
        let registry = MemoryRegistry::new();
        registry.register(&provider("127.0.0.1:1")).await.unwrap();
        registry
            .register(&provider("127.0.0.1:1").with_attribute("weight", "5"))
            .await
            .unwrap();

        let providers = registry.providers("Greeter").unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].attributes.get("weight").map(String::as_str), Some("5"));
    }
}

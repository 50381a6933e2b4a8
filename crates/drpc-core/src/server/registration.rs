//! Provider registration.
//!
//! Validation happens on the caller: a service must declare exactly one
//! interface. The registry round-trip and cache updates then run on the
//! registration executor, and their failures are logged rather than
//! returned.

use super::bindings::ServiceBindings;
use super::executor::TaskExecutor;
use crate::error::{Result, RpcError};
use crate::registry::{ProviderAttributes, ProviderDescriptor, Registry};
use crate::service::{RpcService, ServiceInterface};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

type DescriptorCache = Arc<RwLock<HashMap<String, ProviderDescriptor>>>;

/// Announces local services to the registry.
pub struct RegistrationManager {
    registry: Arc<dyn Registry>,
    bindings: Arc<ServiceBindings>,
    descriptors: DescriptorCache,
    executor: TaskExecutor,
    address: String,
    application_name: String,
}

impl RegistrationManager {
    pub fn new(
        registry: Arc<dyn Registry>,
        bindings: Arc<ServiceBindings>,
        executor: TaskExecutor,
        address: impl Into<String>,
        application_name: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            bindings,
            descriptors: Arc::new(RwLock::new(HashMap::new())),
            executor,
            address: address.into(),
            application_name: application_name.into(),
        }
    }

    /// Address written into every descriptor.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The single interface of `service` and the descriptor announcing it.
    pub fn describe(
        &self,
        service: &dyn RpcService,
    ) -> Result<(ServiceInterface, ProviderDescriptor)> {
        let mut interfaces = service.interfaces();
        if interfaces.len() != 1 {
            return Err(RpcError::AmbiguousServiceInterface {
                implementation: service.implementation_name().to_string(),
                found: interfaces.len(),
            });
        }
        let interface = interfaces.remove(0);
        let descriptor =
            ProviderDescriptor::new(&interface.name, &self.address, &self.application_name)
                .with_attribute(ProviderAttributes::TYPE, ProviderAttributes::TYPE_PROVIDER);
        Ok((interface, descriptor))
    }

    /// Bind `service` locally and announce it.
    ///
    /// Only validation errors are returned; the announcement itself runs in
    /// the background.
    pub async fn register(&self, service: Arc<dyn RpcService>) -> Result<()> {
        let (interface, descriptor) = self.describe(service.as_ref())?;

        let registry = self.registry.clone();
        let bindings = self.bindings.clone();
        let descriptors = self.descriptors.clone();
        self.executor
            .submit(async move {
                let name = interface.name;
                bindings.bind(&name, service);
                match registry.register(&descriptor).await {
                    Ok(()) => {
                        info!("Registered {} at {}", name, descriptor.address);
                        descriptors
                            .write()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(name, descriptor);
                    }
                    Err(e) => {
                        warn!("Failed to register {}: {}", name, e);
                        bindings.unbind(&name);
                    }
                }
            })
            .await;
        Ok(())
    }

    /// Withdraw `service` from the registry, then unbind it.
    pub async fn unregister(&self, service: &dyn RpcService) -> Result<()> {
        let (interface, fresh) = self.describe(service)?;
        let descriptor = self
            .descriptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&interface.name)
            .cloned()
            .unwrap_or(fresh);

        let registry = self.registry.clone();
        let bindings = self.bindings.clone();
        let descriptors = self.descriptors.clone();
        self.executor
            .submit(async move {
                let name = interface.name;
                if let Err(e) = registry.unregister(&descriptor).await {
                    // Still announced, so keep serving it.
                    warn!("Failed to unregister {}: {}", name, e);
                    return;
                }
                bindings.unbind(&name);
                descriptors
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&name);
                info!("Unregistered {}", name);
            })
            .await;
        Ok(())
    }

    /// Descriptors of services currently announced by this manager.
    pub fn registered_services(&self) -> Vec<ProviderDescriptor> {
        let mut list: Vec<ProviderDescriptor> = self
            .descriptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        list
    }

    /// Wait for queued registration tasks to finish.
    pub async fn wait_idle(&self) {
        self.executor.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, ServiceUpdateStream};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Greeter;

    #[async_trait::async_trait]
    impl RpcService for Greeter {
        fn implementation_name(&self) -> &str {
            "Greeter"
        }

        fn interfaces(&self) -> Vec<ServiceInterface> {
            vec![ServiceInterface::new("Greeter", ["greet"])]
        }

        async fn invoke(&self, _method: &str, _args: Vec<Value>) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    /// Fails every registry call and counts them.
    #[derive(Default)]
    struct BrokenRegistry {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Registry for BrokenRegistry {
        async fn register(&self, _provider: &ProviderDescriptor) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RpcError::Registry {
                message: "unreachable".to_string(),
            })
        }

        async fn unregister(&self, _provider: &ProviderDescriptor) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RpcError::Registry {
                message: "unreachable".to_string(),
            })
        }

        async fn subscribe(&self, _service_name: &str) -> Result<ServiceUpdateStream> {
            Err(RpcError::Registry {
                message: "unreachable".to_string(),
            })
        }
    }

    fn manager(registry: Arc<dyn Registry>) -> (RegistrationManager, Arc<ServiceBindings>) {
        let bindings = Arc::new(ServiceBindings::new());
        let manager = RegistrationManager::new(
            registry,
            bindings.clone(),
            TaskExecutor::new("registration", 2, 4),
            "127.0.0.1:7000",
            "greeter-app",
        );
        (manager, bindings)
    }

    #[tokio::test]
    async fn test_register_binds_and_announces() {
        let registry = Arc::new(MemoryRegistry::new());
        let (manager, bindings) = manager(registry.clone());

        manager.register(Arc::new(Greeter)).await.unwrap();
        manager.wait_idle().await;

        assert!(bindings.get("Greeter").is_some());
        let providers = registry.providers("Greeter").unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].address, "127.0.0.1:7000");
        assert_eq!(providers[0].application_name, "greeter-app");
        assert_eq!(
            providers[0].attributes.get(ProviderAttributes::TYPE).map(String::as_str),
            Some(ProviderAttributes::TYPE_PROVIDER)
        );
        assert_eq!(manager.registered_services().len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_withdraws_and_unbinds() {
        let registry = Arc::new(MemoryRegistry::new());
        let (manager, bindings) = manager(registry.clone());
        manager.register(Arc::new(Greeter)).await.unwrap();
        manager.wait_idle().await;

        manager.unregister(&Greeter).await.unwrap();
        manager.wait_idle().await;

        assert!(bindings.get("Greeter").is_none());
        assert!(registry.providers("Greeter").unwrap().is_empty());
        assert!(manager.registered_services().is_empty());
    }

    #[tokio::test]
    async fn test_registry_failure_is_contained() {
        let registry = Arc::new(BrokenRegistry::default());
        let (manager, bindings) = manager(registry.clone());

        manager.register(Arc::new(Greeter)).await.unwrap();
        manager.wait_idle().await;

        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
        assert!(bindings.get("Greeter").is_none());
        assert!(manager.registered_services().is_empty());
    }
}

//! Service name → bound implementation.

use crate::service::RpcService;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type BindingMap = HashMap<String, Arc<dyn RpcService>>;

/// Implementations the dispatcher can route to.
#[derive(Default)]
pub struct ServiceBindings {
    services: RwLock<BindingMap>,
}

impl ServiceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BindingMap> {
        self.services.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BindingMap> {
        self.services.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind `service` under `name`, returning any implementation it replaced.
    pub fn bind(&self, name: &str, service: Arc<dyn RpcService>) -> Option<Arc<dyn RpcService>> {
        self.write().insert(name.to_string(), service)
    }

    pub fn unbind(&self, name: &str) -> Option<Arc<dyn RpcService>> {
        self.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RpcService>> {
        self.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }
}

//! Authoritative service → connection mapping.
//!
//! Registry notifications are the only writers. Each update reconciles the
//! address pool (connect new addresses, reuse live ones, close unreferenced
//! ones) and then swaps the service's list in one assignment, so readers
//! only ever see a complete list.

use crate::registry::ProviderDescriptor;
use crate::transport::{Connection, Connector, FrameHandler};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

type ServiceMap = HashMap<String, Arc<Vec<Connection>>>;

/// Owns every client connection, pooled by provider address.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    handler: Arc<dyn FrameHandler>,
    /// Published per-service lists. Readers never wait on connects.
    services: RwLock<ServiceMap>,
    /// Address → live connection. Held across connects, so updates are
    /// applied one at a time.
    pool: tokio::sync::Mutex<HashMap<String, Connection>>,
}

impl ConnectionManager {
    /// `handler` receives every inbound frame of every connection opened.
    pub fn new(connector: Arc<dyn Connector>, handler: Arc<dyn FrameHandler>) -> Self {
        Self {
            connector,
            handler,
            services: RwLock::new(HashMap::new()),
            pool: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn read_services(&self) -> RwLockReadGuard<'_, ServiceMap> {
        self.services.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_services(&self) -> RwLockWriteGuard<'_, ServiceMap> {
        self.services.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current connection list for a service.
    ///
    /// Unknown services yield an empty list.
    pub fn get_connections(&self, service_name: &str) -> Vec<Connection> {
        self.read_services()
            .get(service_name)
            .map(|list| list.as_ref().clone())
            .unwrap_or_default()
    }

    /// Services with a published connection list.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_services().keys().cloned().collect();
        names.sort();
        names
    }

    /// Reconcile a service's connections with its current providers.
    ///
    /// Addresses that fail to connect are logged and skipped for this update.
    pub async fn on_service_updated(&self, service_name: &str, providers: &[ProviderDescriptor]) {
        let mut pool = self.pool.lock().await;

        let mut seen = HashSet::new();
        let mut next = Vec::with_capacity(providers.len());
        for provider in providers {
            let address = provider.address.as_str();
            if !seen.insert(address) {
                continue;
            }

            if let Some(conn) = pool.get(address) {
                if !conn.is_closed() {
                    next.push(conn.clone());
                    continue;
                }
                debug!("Dropping closed connection to {}", address);
                pool.remove(address);
            }

            match self.connector.connect(address, self.handler.clone()).await {
                Ok(conn) => {
                    info!("Connected to {} for {}", address, service_name);
                    pool.insert(address.to_string(), conn.clone());
                    next.push(conn);
                }
                Err(e) => warn!("Skipping provider {} of {}: {}", address, service_name, e),
            }
        }

        let count = next.len();
        let referenced: HashSet<String> = {
            let mut services = self.write_services();
            services.insert(service_name.to_string(), Arc::new(next));
            services
                .values()
                .flat_map(|list| list.iter().map(|c| c.address().to_string()))
                .collect()
        };

        pool.retain(|address, conn| {
            if referenced.contains(address) {
                return true;
            }
            debug!("Closing unreferenced connection to {}", address);
            conn.close();
            false
        });

        debug!("{} now has {} connection(s)", service_name, count);
    }

    /// Close every pooled connection and forget all services.
    pub async fn close_all(&self) {
        let mut pool = self.pool.lock().await;
        self.write_services().clear();
        for (_, conn) in pool.drain() {
            conn.close();
        }
    }
}

//! Per-call connection selection.
//!
//! The router keeps its own copy of each service's connection set, pulled
//! from the [`ConnectionManager`] on [`Router::refresh`]. Selection always
//! draws from that cache; the filtered candidate list of a call only narrows
//! the choice when it overlaps the cache.
//!
//! Refresh and select share one lock per router, so a select never sees a
//! half-replaced cache.

pub mod policy;

pub use policy::{RandomPolicy, RoundRobinPolicy, SelectionPolicy};

use crate::client::ConnectionManager;
use crate::error::{Result, RpcError};
use crate::transport::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Built-in selection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterKind {
    #[default]
    RoundRobin,
    Random,
}

impl RouterKind {
    /// Parse a policy name as used in config and on the command line.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "round_robin" | "round-robin" | "roundrobin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
        }
    }

    pub fn policy(&self) -> Box<dyn SelectionPolicy> {
        match self {
            Self::RoundRobin => Box::new(RoundRobinPolicy::new()),
            Self::Random => Box::new(RandomPolicy),
        }
    }
}

struct RouterState {
    cache: HashMap<String, Vec<Connection>>,
    policy: Box<dyn SelectionPolicy>,
}

/// Selects one connection per call.
pub struct Router {
    manager: Arc<ConnectionManager>,
    state: Mutex<RouterState>,
}

impl Router {
    pub fn new(manager: Arc<ConnectionManager>, kind: RouterKind) -> Self {
        Self::with_policy(manager, kind.policy())
    }

    /// Use a custom selection policy.
    pub fn with_policy(manager: Arc<ConnectionManager>, policy: Box<dyn SelectionPolicy>) -> Self {
        Self {
            manager,
            state: Mutex::new(RouterState {
                cache: HashMap::new(),
                policy,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RouterState> {
        // Cache replacement and cursor updates are single assignments, so a
        // poisoned state is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy the manager's current set for `service_name` into the cache.
    ///
    /// Returns the number of cached connections.
    pub fn refresh(&self, service_name: &str) -> usize {
        let connections = self.manager.get_connections(service_name);
        let mut state = self.lock_state();
        state.policy.on_refresh(service_name, &connections);
        let count = connections.len();
        state.cache.insert(service_name.to_string(), connections);
        debug!(
            "Router ({}) refreshed {}: {} connection(s)",
            state.policy.name(),
            service_name,
            count
        );
        count
    }

    /// Pick the connection for one call.
    ///
    /// Fails with [`RpcError::NoAvailableConnection`] when the cache holds
    /// no open connection for the service.
    pub fn select(&self, service_name: &str, candidates: &[Connection]) -> Result<Connection> {
        let mut state = self.lock_state();
        let cached: Vec<Connection> = state
            .cache
            .get(service_name)
            .map(|conns| conns.iter().filter(|c| !c.is_closed()).cloned().collect())
            .unwrap_or_default();

        if cached.is_empty() {
            return Err(RpcError::NoAvailableConnection {
                service: service_name.to_string(),
            });
        }

        let preferred: Vec<Connection> = cached
            .iter()
            .filter(|c| candidates.contains(c))
            .cloned()
            .collect();
        let pool = if preferred.is_empty() {
            &cached
        } else {
            &preferred
        };

        Ok(state.policy.select(service_name, pool))
    }

    /// Copy of the cached set for a service.
    pub fn cached(&self, service_name: &str) -> Vec<Connection> {
        self.lock_state()
            .cache
            .get(service_name)
            .cloned()
            .unwrap_or_default()
    }
}

//! Selection policies.

use crate::transport::Connection;
use rand::Rng;
use std::collections::HashMap;

/// Picks one connection from a non-empty pool.
///
/// Called with the router lock held, so implementations may keep mutable
/// per-service state without their own synchronization.
pub trait SelectionPolicy: Send + 'static {
    fn name(&self) -> &'static str;

    /// The cached set for `service_name` was just replaced.
    fn on_refresh(&mut self, _service_name: &str, _connections: &[Connection]) {}

    /// Choose from `pool`. `pool` is never empty.
    fn select(&mut self, service_name: &str, pool: &[Connection]) -> Connection;
}

/// Cycles through the pool, one cursor per service.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    cursors: HashMap<String, usize>,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for RoundRobinPolicy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn on_refresh(&mut self, service_name: &str, _connections: &[Connection]) {
        self.cursors.insert(service_name.to_string(), 0);
    }

    fn select(&mut self, service_name: &str, pool: &[Connection]) -> Connection {
        let cursor = self.cursors.entry(service_name.to_string()).or_insert(0);
        let chosen = pool[*cursor % pool.len()].clone();
        *cursor = cursor.wrapping_add(1);
        chosen
    }
}

/// Uniform random choice.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPolicy;

impl SelectionPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&mut self, _service_name: &str, pool: &[Connection]) -> Connection {
        let index = rand::rng().random_range(0..pool.len());
        pool[index].clone()
    }
}

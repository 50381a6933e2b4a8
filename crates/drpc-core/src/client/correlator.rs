//! Pending call table.
//!
//! Bridges responses decoded on connection reader tasks to the caller task
//! waiting for a specific request id.
//!
//! ```text
//! caller:  register(id) ─ send ─ await_and_remove(id, timeout) ──┐
//!                                                                 │ Notify
//! reader:                    decode ─ put(response) ──────────────┘
//! ```
//!
//! A registered or awaited id owns a slot with its own `Notify`; slots live
//! until their caller takes the response or gives up, and never expire.
//! Responses nobody registered for are parked in a TTL cache, and ids that
//! have been handed out or abandoned are remembered in a second TTL cache so
//! a late or duplicate response is dropped on arrival.

use crate::config::CorrelatorConfig;
use crate::error::{Result, RpcError};
use crate::protocol::RpcResponse;
use mini_moka::sync::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Default)]
struct Slot {
    response: Option<RpcResponse>,
    notify: Arc<Notify>,
}

/// Maps in-flight request ids to their responses.
pub struct ResponseCorrelator {
    /// Ids with a caller attached. Also serializes every table operation.
    slots: Mutex<HashMap<String, Slot>>,
    /// Responses that arrived before anyone asked for them.
    unclaimed: Cache<String, RpcResponse>,
    /// Ids already delivered or abandoned.
    tombstones: Cache<String, ()>,
    ttl: Duration,
}

impl Default for ResponseCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self::with_ttl(CorrelatorConfig::ENTRY_TTL)
    }

    /// Size the expiry for clients waiting up to `request_timeout`.
    ///
    /// Tombstones must outlive the longest wait, or a response arriving
    /// after its caller timed out would be parked instead of dropped.
    pub fn for_request_timeout(request_timeout: Duration) -> Self {
        Self::with_ttl(CorrelatorConfig::ENTRY_TTL.max(request_timeout * 2))
    }

    /// Use a custom expiry for unclaimed responses and tombstones.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            unclaimed: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(CorrelatorConfig::MAX_ENTRIES)
                .build(),
            tombstones: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(CorrelatorConfig::MAX_ENTRIES)
                .build(),
            ttl,
        }
    }

    /// Expiry of unclaimed responses and tombstones.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // Every mutation is a single map operation, so a poisoned table is
        // still structurally valid.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a slot for a request about to be sent.
    pub fn register(&self, id: &str) {
        let mut slots = self.lock_slots();
        self.tombstones.invalidate(&id.to_string());
        slots.entry(id.to_string()).or_default();
    }

    /// Store an arrived response, waking its waiter.
    ///
    /// Overwrites an earlier unclaimed response for the same id. Returns
    /// `false` when the id was already retrieved or abandoned and the
    /// response was discarded.
    pub fn put(&self, response: RpcResponse) -> bool {
        let mut slots = self.lock_slots();
        if self.tombstones.contains_key(&response.id) {
            debug!("Discarding late response for {}", response.id);
            return false;
        }

        match slots.get_mut(&response.id) {
            Some(slot) => {
                slot.response = Some(response);
                slot.notify.notify_one();
            }
            None => {
                trace!("Parking unclaimed response {}", response.id);
                self.unclaimed.insert(response.id.clone(), response);
            }
        }
        true
    }

    /// Wait for the response to `id`, removing it from the table.
    ///
    /// Fails with [`RpcError::RequestTimeout`] when nothing arrives within
    /// `timeout`; the slot is reclaimed either way.
    pub async fn await_and_remove(&self, id: &str, timeout: Duration) -> Result<RpcResponse> {
        let deadline = Instant::now() + timeout;

        loop {
            let notify = {
                let mut slots = self.lock_slots();
                if let Some(response) = self.take_arrived(&mut slots, id) {
                    return Ok(response);
                }
                if self.tombstones.contains_key(&id.to_string()) {
                    // Already delivered or abandoned; nothing more can arrive.
                    return Err(Self::timeout_error(id, timeout));
                }
                slots.entry(id.to_string()).or_default().notify.clone()
            };

            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                let mut slots = self.lock_slots();
                // A response may have landed right at the deadline.
                if let Some(response) = self.take_arrived(&mut slots, id) {
                    return Ok(response);
                }
                slots.remove(id);
                self.tombstones.insert(id.to_string(), ());
                trace!("Request {} abandoned after {:?}", id, timeout);
                return Err(Self::timeout_error(id, timeout));
            }
        }
    }

    /// Number of ids with a caller attached (registered or waiting).
    pub fn pending_count(&self) -> usize {
        self.lock_slots().len()
    }

    /// Drop the slot for a request that will never be awaited.
    pub fn forget(&self, id: &str) {
        let mut slots = self.lock_slots();
        if slots.remove(id).is_some() {
            self.tombstones.insert(id.to_string(), ());
        }
    }

    fn take_arrived(&self, slots: &mut HashMap<String, Slot>, id: &str) -> Option<RpcResponse> {
        let key = id.to_string();
        let response = match slots.get_mut(id).and_then(|slot| slot.response.take()) {
            Some(response) => response,
            None => self.unclaimed.get(&key)?,
        };
        slots.remove(id);
        self.unclaimed.invalidate(&key);
        self.tombstones.insert(key, ());
        Some(response)
    }

    fn timeout_error(id: &str, timeout: Duration) -> RpcError {
        RpcError::RequestTimeout {
            request_id: id.to_string(),
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(id: &str, value: &str) -> RpcResponse {
        RpcResponse::success(id, json!(value))
    }

    #[tokio::test]
    async fn test_put_before_await_returns_latest() {
        let correlator = ResponseCorrelator::new();
        correlator.put(response("a", "first"));
        correlator.put(response("a", "second"));

        let got = correlator
            .await_and_remove("a", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(got.result, Some(json!("second")));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_second_await_after_removal_times_out() {
        let correlator = ResponseCorrelator::new();
        correlator.put(response("a", "only"));
        correlator
            .await_and_remove("a", Duration::from_millis(100))
            .await
            .unwrap();

        let second = correlator
            .await_and_remove("a", Duration::from_millis(50))
            .await;
        assert!(matches!(second, Err(RpcError::RequestTimeout { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_after_removal_is_discarded() {
        let correlator = ResponseCorrelator::new();
        correlator.register("a");
        assert!(correlator.put(response("a", "one")));
        correlator
            .await_and_remove("a", Duration::from_millis(100))
            .await
            .unwrap();

        assert!(!correlator.put(response("a", "dup")));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_waiter_is_woken_by_put() {
        let correlator = Arc::new(ResponseCorrelator::new());
        correlator.register("wake");

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .await_and_remove("wake", Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        correlator.put(response("wake", "up"));

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.result, Some(json!("up")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reclaims_slot_and_drops_late_response() {
        let correlator = ResponseCorrelator::new();
        correlator.register("slow");

        let result = correlator
            .await_and_remove("slow", Duration::from_millis(2000))
            .await;
        assert!(matches!(result, Err(RpcError::RequestTimeout { .. })));
        assert_eq!(correlator.pending_count(), 0);

        assert!(!correlator.put(response("slow", "late")));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_waiter_outliving_ttl_is_still_woken() {
        let correlator = Arc::new(ResponseCorrelator::with_ttl(Duration::from_millis(100)));
        correlator.register("slow");

        let started = Instant::now();
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .await_and_remove("slow", Duration::from_secs(10))
                    .await
            })
        };

        // Other traffic after the TTL has passed must not disturb the waiter.
        tokio::time::sleep(Duration::from_millis(150)).await;
        correlator.put(response("other", "noise"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        correlator.put(response("slow", "arrived"));

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.result, Some(json!("arrived")));
        assert!(started.elapsed() < Duration::from_secs(5));

        correlator.put(response("third", "noise"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unclaimed_response_expires() {
        let correlator = ResponseCorrelator::with_ttl(Duration::from_millis(50));
        correlator.put(response("orphan", "x"));

        tokio::time::sleep(Duration::from_millis(150)).await;

        let result = correlator
            .await_and_remove("orphan", Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(RpcError::RequestTimeout { .. })));
    }

    #[test]
    fn test_ttl_covers_long_request_timeouts() {
        let short = ResponseCorrelator::for_request_timeout(Duration::from_secs(3));
        assert_eq!(short.ttl(), CorrelatorConfig::ENTRY_TTL);

        let long = ResponseCorrelator::for_request_timeout(Duration::from_secs(120));
        assert_eq!(long.ttl(), Duration::from_secs(240));
    }

    #[tokio::test]
    async fn test_concurrent_ids_do_not_cross() {
        let correlator = Arc::new(ResponseCorrelator::new());
        let mut waiters = Vec::new();
        for i in 0..16 {
            let id = format!("req-{}", i);
            correlator.register(&id);
            let correlator = correlator.clone();
            waiters.push(tokio::spawn(async move {
                let got = correlator
                    .await_and_remove(&id, Duration::from_secs(5))
                    .await
                    .unwrap();
                (id, got)
            }));
        }

        // Deliver in reverse order.
        for i in (0..16).rev() {
            let id = format!("req-{}", i);
            correlator.put(response(&id, &id));
        }

        for waiter in waiters {
            let (id, got) = waiter.await.unwrap();
            assert_eq!(got.result, Some(json!(id)));
        }
    }
}

//! Client-side filter chain over candidate connections.

use crate::protocol::RpcRequest;
use crate::transport::Connection;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// State a client filter sees for one call.
///
/// `candidates` is a private copy of the connection manager's list; editing
/// it never touches the authoritative set.
pub struct ClientCall<'a> {
    pub request: &'a RpcRequest,
    pub candidates: Vec<Connection>,
    /// Free-form notes filters leave for the log line of this call.
    pub diagnostics: Vec<String>,
}

impl<'a> ClientCall<'a> {
    pub fn new(request: &'a RpcRequest, candidates: Vec<Connection>) -> Self {
        Self {
            request,
            candidates,
            diagnostics: Vec::new(),
        }
    }
}

/// One step of the client chain.
///
/// Filters run even when an earlier one emptied the candidate list, so
/// every implementation must handle an empty list.
pub trait ClientFilter: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn filter(&self, call: &mut ClientCall<'_>);
}

/// Ordered client filters.
#[derive(Clone, Default)]
pub struct ClientFilterChain {
    filters: Vec<Arc<dyn ClientFilter>>,
}

impl fmt::Debug for ClientFilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}

impl ClientFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter; it runs after every filter added before it.
    pub fn add_filter(&mut self, filter: impl ClientFilter) {
        self.filters.push(Arc::new(filter));
    }

    pub fn with_filter(mut self, filter: impl ClientFilter) -> Self {
        self.add_filter(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter in registration order.
    pub fn apply(&self, call: &mut ClientCall<'_>) {
        for filter in &self.filters {
            filter.filter(call);
        }
    }
}

/// Logs each outgoing call with its candidate count.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientLogFilter;

impl ClientFilter for ClientLogFilter {
    fn name(&self) -> &'static str {
        "client-log"
    }

    fn filter(&self, call: &mut ClientCall<'_>) {
        debug!(
            "Calling {}.{} (request {}), {} candidate(s)",
            call.request.service_name(),
            call.request.method_name(),
            call.request.id(),
            call.candidates.len()
        );
    }
}

/// Removes candidates whose address is blocked.
#[derive(Debug, Default, Clone)]
pub struct AddressBlocklistFilter {
    blocked: HashSet<String>,
}

impl AddressBlocklistFilter {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked: addresses.into_iter().map(Into::into).collect(),
        }
    }
}

impl ClientFilter for AddressBlocklistFilter {
    fn name(&self) -> &'static str {
        "address-blocklist"
    }

    fn filter(&self, call: &mut ClientCall<'_>) {
        let before = call.candidates.len();
        call.candidates
            .retain(|conn| !self.blocked.contains(conn.address()));
        let removed = before - call.candidates.len();
        if removed > 0 {
            call.diagnostics
                .push(format!("address-blocklist removed {}", removed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::transport::FrameHandler;
    use bytes::Bytes;
    use std::sync::Mutex;

    struct Ignore;

    #[async_trait::async_trait]
    impl FrameHandler for Ignore {
        async fn on_frame(&self, _connection: &Connection, _frame: Bytes) -> Result<()> {
            Ok(())
        }
    }

    fn conn(address: &str) -> Connection {
        let (a, _b) = tokio::io::duplex(16);
        Connection::spawn(a, address, Arc::new(Ignore))
    }

    /// Records the order it ran in and the candidate count it saw.
    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<(&'static str, usize)>>>,
        clear: bool,
    }

    impl ClientFilter for Recording {
        fn name(&self) -> &'static str {
            self.label
        }

        fn filter(&self, call: &mut ClientCall<'_>) {
            self.log
                .lock()
                .unwrap()
                .push((self.label, call.candidates.len()));
            if self.clear {
                call.candidates.clear();
            }
        }
    }

    #[tokio::test]
    async fn test_filters_run_in_order_even_after_emptying() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ClientFilterChain::new()
            .with_filter(Recording {
                label: "first",
                log: log.clone(),
                clear: true,
            })
            .with_filter(Recording {
                label: "second",
                log: log.clone(),
                clear: false,
            })
            .with_filter(ClientLogFilter);

        let request = RpcRequest::new("Greeter", "greet", vec![]);
        let authoritative = vec![conn("a:1"), conn("b:2")];
        let mut call = ClientCall::new(&request, authoritative.clone());
        chain.apply(&mut call);

        assert_eq!(*log.lock().unwrap(), vec![("first", 2), ("second", 0)]);
        assert!(call.candidates.is_empty());
        assert_eq!(authoritative.len(), 2);
        assert_eq!(chain.len(), 3);
    }

    #[tokio::test]
    async fn test_blocklist_removes_matching_addresses() {
        let chain = ClientFilterChain::new().with_filter(AddressBlocklistFilter::new(["b:2"]));
        let request = RpcRequest::new("Greeter", "greet", vec![]);
        let mut call = ClientCall::new(&request, vec![conn("a:1"), conn("b:2"), conn("c:3")]);

        chain.apply(&mut call);

        let left: Vec<&str> = call.candidates.iter().map(|c| c.address()).collect();
        assert_eq!(left, vec!["a:1", "c:3"]);
        assert_eq!(call.diagnostics.len(), 1);
    }
}

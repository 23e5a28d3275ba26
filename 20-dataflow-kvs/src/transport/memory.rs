//! In-process network for tests. Partitioned links drop and count envelopes.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::mpsc;
use tracing::debug;

use super::{Envelope, Inbox, Transport};

#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Debug, Default)]
struct NetworkState {
    endpoints: HashMap<String, mpsc::UnboundedSender<Envelope>>,
    partitions: HashSet<(String, String)>,
    delivered: u64,
    dropped: u64,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address`, replacing any earlier endpoint with that name.
    pub fn endpoint(&self, address: &str) -> (MemoryTransport, Inbox) {
        let (sender, inbox) = Inbox::channel();
        self.lock().endpoints.insert(address.to_string(), sender);
        let transport = MemoryTransport {
            address: address.to_string(),
            network: self.clone(),
        };
        (transport, inbox)
    }

    /// Drops every envelope between `a` and `b`, in both directions.
    pub fn partition(&self, a: &str, b: &str) {
        self.lock().partitions.insert(link(a, b));
        debug!(a, b, "partitioned");
    }

    pub fn heal(&self, a: &str, b: &str) {
        self.lock().partitions.remove(&link(a, b));
        debug!(a, b, "healed");
    }

    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    fn deliver(&self, envelope: Envelope) {
        let mut state = self.lock();
        if state.partitions.contains(&link(&envelope.from, &envelope.to)) {
            debug!(from = %envelope.from, to = %envelope.to, "dropped by partition");
            state.dropped += 1;
            return;
        }

        let accepted = match state.endpoints.get(&envelope.to) {
            Some(endpoint) => endpoint.send(envelope).is_ok(),
            None => {
                debug!(to = %envelope.to, "no such endpoint");
                false
            }
        };
        if accepted {
            state.delivered += 1;
        } else {
            state.dropped += 1;
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn link(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    address: String,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn local_addr(&self) -> &str {
        &self.address
    }

    fn send(&self, envelope: Envelope) {
        self.network.deliver(envelope);
    }
}

//! Local connection registry.
//!
//! Tracks this process's client connections and their channel
//! subscriptions: one map `connection → set<channel>` and the inverse
//! `channel → set<connection>`, every mutation touching both under one
//! narrow critical section. The accept path is the only place the
//! active-connection gauge increments; the remove path the only decrement.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of one connected client.
pub type ClientId = Uuid;

struct ClientEntry {
    tx:       mpsc::UnboundedSender<String>,
    channels: HashSet<String>,
}

#[derive(Default)]
struct RegistryState {
    clients:  HashMap<ClientId, ClientEntry>,
    channels: HashMap<String, HashSet<ClientId>>,
}

impl RegistryState {
    fn subscribe(&mut self, client_id: ClientId, channel: &str) {
        if let Some(entry) = self.clients.get_mut(&client_id) {
            entry.channels.insert(channel.to_string());
            self.channels.entry(channel.to_string()).or_default().insert(client_id);
        }
    }

    fn unsubscribe(&mut self, client_id: ClientId, channel: &str) {
        if let Some(entry) = self.clients.get_mut(&client_id) {
            entry.channels.remove(channel);
        }
        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(&client_id);
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    fn remove(&mut self, client_id: ClientId) -> bool {
        let Some(entry) = self.clients.remove(&client_id) else {
            return false;
        };
        for channel in &entry.channels {
            if let Some(members) = self.channels.get_mut(channel) {
                members.remove(&client_id);
                if members.is_empty() {
                    self.channels.remove(channel);
                }
            }
        }
        true
    }
}

/// Per-process connection and subscription bookkeeping.
#[derive(Default)]
pub struct ClientRegistry {
    state:  Mutex<RegistryState>,
    active: AtomicUsize,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with its outbound frame sender and initial
    /// channel. The only increment site of the connection gauge.
    pub fn register(&self, tx: mpsc::UnboundedSender<String>, initial_channel: &str) -> ClientId {
        let client_id = Uuid::new_v4();
        {
            let mut state = self.state.lock();
            state.clients.insert(client_id, ClientEntry {
                tx,
                channels: HashSet::new(),
            });
            state.subscribe(client_id, initial_channel);
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        client_id
    }

    /// Add a client to a channel set.
    pub fn subscribe(&self, client_id: ClientId, channel: &str) {
        self.state.lock().subscribe(client_id, channel);
    }

    /// Remove a client from a channel set, keeping the connection.
    pub fn unsubscribe(&self, client_id: ClientId, channel: &str) {
        self.state.lock().unsubscribe(client_id, channel);
    }

    /// Remove a connection from all channel sets. Idempotent: the gauge
    /// decrements exactly once per registered client, never per subscribe.
    pub fn remove(&self, client_id: ClientId) {
        let was_registered = self.state.lock().remove(client_id);
        if was_registered {
            self.active.fetch_sub(1, Ordering::SeqCst);
            tracing::info!(%client_id, "client disconnected");
        }
    }

    /// Currently registered connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Deliver a payload to every local subscriber of `channel`. A send
    /// error marks the connection dead and removes it immediately.
    pub fn dispatch(&self, channel: &str, payload: &str) {
        let mut dead: Vec<ClientId> = Vec::new();
        {
            let state = self.state.lock();
            let Some(members) = state.channels.get(channel) else {
                return;
            };
            for client_id in members {
                if let Some(entry) = state.clients.get(client_id) {
                    if entry.tx.send(payload.to_string()).is_err() {
                        dead.push(*client_id);
                    }
                }
            }
        }
        for client_id in dead {
            self.remove(client_id);
        }
    }

    /// Send a ping frame to every connection, evicting any that fail.
    pub fn heartbeat(&self) {
        let payload = json!({"type": "ping"}).to_string();
        let mut dead: Vec<ClientId> = Vec::new();
        {
            let state = self.state.lock();
            for (client_id, entry) in &state.clients {
                if entry.tx.send(payload.clone()).is_err() {
                    dead.push(*client_id);
                }
            }
        }
        for client_id in dead {
            self.remove(client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove_balance_gauge() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = registry.register(tx, "ns:t:general");
        assert_eq!(registry.active_connections(), 1);

        registry.subscribe(client, "ns:t:execution:e1");
        registry.subscribe(client, "ns:t:widget:w1");
        assert_eq!(registry.active_connections(), 1, "subscribes never touch the gauge");

        registry.remove(client);
        assert_eq!(registry.active_connections(), 0);
        registry.remove(client);
        assert_eq!(registry.active_connections(), 0, "remove is idempotent");
    }

    #[tokio::test]
    async fn test_dispatch_reaches_only_subscribers() {
        let registry = ClientRegistry::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let a = registry.register(tx_a, "ns:t:general");
        registry.subscribe(a, "ns:t:execution:e1");

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let _b = registry.register(tx_b, "ns:t:general");

        registry.dispatch("ns:t:execution:e1", "{\"status\":\"running\"}");
        assert_eq!(rx_a.recv().await.as_deref(), Some("{\"status\":\"running\"}"));
        assert!(rx_b.try_recv().is_err(), "non-subscriber receives nothing");
    }

    #[test]
    fn test_dispatch_prunes_dead_connections() {
        let registry = ClientRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let client = registry.register(tx, "ns:t:general");
        registry.subscribe(client, "ns:t:widget:w1");
        drop(rx);

        registry.dispatch("ns:t:widget:w1", "frame");
        assert_eq!(registry.active_connections(), 0, "dead client removed after one attempt");

        // A second dispatch must find an empty channel set.
        registry.dispatch("ns:t:widget:w1", "frame");
    }

    #[tokio::test]
    async fn test_heartbeat_evicts_failed_connections() {
        let registry = ClientRegistry::new();

        let (tx_ok, mut rx_ok) = mpsc::unbounded_channel();
        registry.register(tx_ok, "ns:t:general");
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        registry.register(tx_dead, "ns:t:general");
        drop(rx_dead);

        registry.heartbeat();
        assert_eq!(registry.active_connections(), 1);
        assert_eq!(rx_ok.recv().await.as_deref(), Some("{\"type\":\"ping\"}"));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = registry.register(tx, "ns:t:general");

        registry.subscribe(client, "ns:t:execution:e9");
        registry.unsubscribe(client, "ns:t:execution:e9");
        registry.dispatch("ns:t:execution:e9", "frame");
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.active_connections(), 1, "unsubscribe keeps the connection");
    }
}

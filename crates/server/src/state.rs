use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use parley_shared::ServerDirective;

/// Capacity of each peer's outgoing line queue.
pub const PEER_QUEUE_CAPACITY: usize = 128;

/// Sender half of a peer's outgoing line queue.
pub type PeerSender = mpsc::Sender<String>;

/// Global session registry shared across handler tasks.
///
/// Handlers hold this handle plus their own display name; routing always
/// goes through the registry, never peer-to-peer handler references.
/// Structural changes (claim/remove) and the directory broadcasts they
/// trigger happen under one write lock, so the directory every peer
/// observes is always consistent with the name-uniqueness invariant.
#[derive(Debug, Clone)]
pub struct ServerState {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Display name → peer. Names are case-sensitive and unique.
    peers: HashMap<String, PeerInfo>,
    /// Registration order; drives `ONLINE:` and port assignment.
    order: Vec<String>,
    /// Group name → ordered member list, as given at creation.
    groups: HashMap<String, Vec<String>>,
}

#[derive(Debug)]
struct PeerInfo {
    /// Address the peer claimed at handshake. `None` until the IP line
    /// arrives; such half-registered peers already hold their name.
    ip: Option<String>,
    tx: PeerSender,
}

impl Inner {
    /// Queue a line for one peer, dropping it if the queue is full.
    fn send_line(&self, name: &str, line: &str) {
        if let Some(peer) = self.peers.get(name) {
            if peer.tx.try_send(line.to_string()).is_err() {
                tracing::debug!(%name, "peer queue full, dropping line");
            }
        }
    }

    fn broadcast_except(&self, except: Option<&str>, line: &str) {
        for name in &self.order {
            if Some(name.as_str()) != except {
                self.send_line(name, line);
            }
        }
    }
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Atomically claim a display name for a connecting peer.
    /// Returns false when the name is already held.
    pub async fn try_claim(&self, name: &str, tx: PeerSender) -> bool {
        let mut inner = self.inner.write().await;
        if inner.peers.contains_key(name) {
            return false;
        }
        inner.order.push(name.to_string());
        inner.peers.insert(name.to_string(), PeerInfo { ip: None, tx });
        true
    }

    /// Record the claimed address and announce the peer: a join line to
    /// everyone else, then the refreshed directory to everyone including
    /// the newcomer.
    pub async fn complete_registration(&self, name: &str, ip: String) {
        let mut inner = self.inner.write().await;
        if let Some(peer) = inner.peers.get_mut(name) {
            peer.ip = Some(ip);
        }
        inner.broadcast_except(Some(name), &format!("{} has joined the chat.", name));
        let online = ServerDirective::Online(inner.order.clone()).encode();
        inner.broadcast_except(None, &online);
        tracing::info!(%name, total = inner.order.len(), "peer registered");
    }

    /// Remove a peer and broadcast its departure. The removed peer itself
    /// is told to terminate. Returns false if the name was not registered.
    pub async fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(peer) = inner.peers.remove(name) else {
            return false;
        };
        inner.order.retain(|n| n != name);
        let _ = peer.tx.try_send(ServerDirective::Terminate.encode());
        let leaving = ServerDirective::Leaving(name.to_string()).encode();
        inner.broadcast_except(None, &leaving);
        inner.broadcast_except(None, &format!("{} has left the group chat.", name));
        tracing::info!(%name, total = inner.order.len(), "peer removed");
        true
    }

    /// Queue a line for one peer by name.
    pub async fn send_to(&self, name: &str, line: &str) {
        let inner = self.inner.read().await;
        inner.send_line(name, line);
    }

    /// Queue a line for every peer except `except`.
    pub async fn broadcast_except(&self, except: Option<&str>, line: &str) {
        let inner = self.inner.read().await;
        inner.broadcast_except(except, line);
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.inner.read().await.peers.contains_key(name)
    }

    /// Claimed address of a peer, if registered and past the IP line.
    pub async fn peer_ip(&self, name: &str) -> Option<String> {
        self.inner.read().await.peers.get(name).and_then(|p| p.ip.clone())
    }

    /// Display names in registration order.
    pub async fn directory(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// `(name, ip)` pairs in registration order, skipping peers whose
    /// claimed address has not arrived yet.
    pub async fn peers_with_ips(&self) -> Vec<(String, String)> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|name| {
                inner
                    .peers
                    .get(name)
                    .and_then(|p| p.ip.clone())
                    .map(|ip| (name.clone(), ip))
            })
            .collect()
    }

    /// Create or replace a group. Membership is stored exactly as given.
    pub async fn create_group(&self, name: &str, members: Vec<String>) {
        let mut inner = self.inner.write().await;
        inner.groups.insert(name.to_string(), members);
    }

    pub async fn group_members(&self, name: &str) -> Option<Vec<String>> {
        self.inner.read().await.groups.get(name).cloned()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (PeerSender, mpsc::Receiver<String>) {
        mpsc::channel(PEER_QUEUE_CAPACITY)
    }

    #[tokio::test]
    async fn names_are_unique_until_removed() {
        let state = ServerState::new();
        let (tx_a, _rx_a) = queue();
        let (tx_b, _rx_b) = queue();
        assert!(state.try_claim("alice", tx_a).await);
        assert!(!state.try_claim("alice", tx_b.clone()).await);
        assert!(state.remove("alice").await);
        assert!(state.try_claim("alice", tx_b).await);
    }

    #[tokio::test]
    async fn directory_keeps_registration_order() {
        let state = ServerState::new();
        let mut rxs = Vec::new();
        for name in ["alice", "bob", "carol"] {
            let (tx, rx) = queue();
            assert!(state.try_claim(name, tx).await);
            state.complete_registration(name, "10.0.0.1".into()).await;
            rxs.push(rx);
        }
        assert_eq!(state.directory().await, vec!["alice", "bob", "carol"]);

        // Last ONLINE line each peer saw lists everyone in order.
        let mut last = None;
        while let Ok(line) = rxs[0].try_recv() {
            if line.starts_with("ONLINE:") {
                last = Some(line);
            }
        }
        assert_eq!(last.as_deref(), Some("ONLINE:alice,bob,carol"));
    }

    #[tokio::test]
    async fn removal_notifies_the_removed_peer_and_the_rest() {
        let state = ServerState::new();
        let (tx_a, mut rx_a) = queue();
        let (tx_b, mut rx_b) = queue();
        state.try_claim("alice", tx_a).await;
        state.complete_registration("alice", "10.0.0.1".into()).await;
        state.try_claim("bob", tx_b).await;
        state.complete_registration("bob", "10.0.0.2".into()).await;

        assert!(state.remove("bob").await);

        let mut bob_lines = Vec::new();
        while let Ok(line) = rx_b.try_recv() {
            bob_lines.push(line);
        }
        assert_eq!(bob_lines.last().map(String::as_str), Some("terminate"));

        let mut alice_lines = Vec::new();
        while let Ok(line) = rx_a.try_recv() {
            alice_lines.push(line);
        }
        assert!(alice_lines.iter().any(|l| l == "LEAVING: bob"));
        assert!(alice_lines.iter().any(|l| l == "bob has left the group chat."));
    }

    #[tokio::test]
    async fn half_registered_peers_are_skipped_by_ip_listing() {
        let state = ServerState::new();
        let (tx, _rx) = queue();
        state.try_claim("alice", tx).await;
        assert!(state.peers_with_ips().await.is_empty());
        state.complete_registration("alice", "10.0.0.1".into()).await;
        assert_eq!(
            state.peers_with_ips().await,
            vec![("alice".to_string(), "10.0.0.1".to_string())]
        );
    }
}

//! The shared directory: who is connected, and who holds which file.
//!
//! The directory is the only shared mutable state in the service. Every
//! operation takes the internal lock for a short, I/O-free critical section;
//! callers write to sessions only through handles cloned out of it, after the
//! lock is released.
//!
//! Holder lists are deliberately never pruned when a node disconnects: a
//! stale holder is simply unroutable, and liveness is re-checked against the
//! session map at routing time. Rebuilding happens naturally as nodes
//! reconnect and re-announce.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::BytesMut;
use tokio::sync::{RwLock, mpsc};

static CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> u64 {
    CONNECTION_ID.fetch_add(1, Ordering::SeqCst)
}

/// Non-owning routing handle for one live session.
///
/// The session task owns the connection; the directory only keeps this handle
/// for lookups, and it is removed synchronously when the session ends. The
/// sender feeds the session's writer task, so a send never blocks and fails
/// only once the session is gone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub node_id: String,
    pub conn_id: u64,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    tx: mpsc::UnboundedSender<BytesMut>,
}

impl SessionHandle {
    pub fn new(
        node_id: String,
        conn_id: u64,
        addr: SocketAddr,
        tx: mpsc::UnboundedSender<BytesMut>,
    ) -> Self {
        Self {
            node_id,
            conn_id,
            addr,
            connected_at: Instant::now(),
            tx,
        }
    }

    /// Queue a frame for this session. Returns false if the session's writer
    /// is gone.
    pub fn send(&self, frame: BytesMut) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn is_live(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Outcome of registering a node identifier.
#[derive(Debug)]
pub enum Registration {
    /// Identifier was free.
    New,
    /// Identifier was already live; the previous session was evicted and its
    /// handle returned so the caller can notify it.
    Evicted(SessionHandle),
    /// Server at capacity; nothing was registered.
    Full,
}

#[derive(Debug, Default)]
struct Inner {
    /// Live node identifier -> session handle.
    sessions: HashMap<String, SessionHandle>,

    /// File name -> holders in insertion order. Possibly stale.
    holders: HashMap<String, Vec<String>>,
}

/// The file-ownership directory plus the live session map.
#[derive(Debug, Default)]
pub struct Directory {
    inner: RwLock<Inner>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live session under its node identifier, bounded by
    /// `max_nodes`. A second handshake with an identifier that is already
    /// live evicts the previous session; the new connection wins. Eviction
    /// happens before the capacity check, under the same lock, so a
    /// reconnecting node is never turned away from a full server and
    /// concurrent handshakes cannot overshoot the limit.
    pub async fn register_node(&self, handle: SessionHandle, max_nodes: usize) -> Registration {
        let mut inner = self.inner.write().await;
        if let Some(old) = inner.sessions.remove(&handle.node_id) {
            inner.sessions.insert(handle.node_id.clone(), handle);
            return Registration::Evicted(old);
        }
        if inner.sessions.len() >= max_nodes {
            return Registration::Full;
        }
        inner.sessions.insert(handle.node_id.clone(), handle);
        Registration::New
    }

    /// Remove the session mapping for `id`, but only if it still belongs to
    /// the connection identified by `conn_id`. An evicted session's cleanup
    /// must not remove its replacement.
    pub async fn unregister_node(&self, id: &str, conn_id: u64) -> bool {
        let mut inner = self.inner.write().await;
        if inner.sessions.get(id).is_some_and(|s| s.conn_id == conn_id) {
            inner.sessions.remove(id);
            true
        } else {
            false
        }
    }

    /// Record `id` as a holder of `file`. Idempotent; insertion order is
    /// preserved for first-known-holder selection.
    pub async fn record_holder(&self, file: &str, id: &str) {
        let mut inner = self.inner.write().await;
        let holders = inner.holders.entry(file.to_string()).or_default();
        if !holders.iter().any(|h| h == id) {
            holders.push(id.to_string());
        }
    }

    /// Current holder list for `file` in insertion order, possibly stale.
    /// Empty if the file is unknown.
    pub async fn holders_of(&self, file: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.holders.get(file).cloned().unwrap_or_default()
    }

    /// Session handle for `id`, if it is currently connected. Checked at
    /// routing time, just before writing.
    pub async fn live_session_of(&self, id: &str) -> Option<SessionHandle> {
        let inner = self.inner.read().await;
        inner.sessions.get(id).cloned()
    }

    /// Identifiers of all currently connected nodes.
    pub async fn snapshot_connected_nodes(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.sessions.keys().cloned().collect()
    }

    /// Handles of all currently connected sessions, for fan-out. Writes
    /// happen against this snapshot after the lock is released.
    pub async fn snapshot_sessions(&self) -> Vec<SessionHandle> {
        let inner = self.inner.read().await;
        inner.sessions.values().cloned().collect()
    }

    pub async fn online_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> (SessionHandle, mpsc::UnboundedReceiver<BytesMut>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        (
            SessionHandle::new(id.to_string(), next_connection_id(), addr, tx),
            rx,
        )
    }

    #[tokio::test]
    async fn test_record_holder_idempotent() {
        let dir = Directory::new();
        dir.record_holder("report.pdf", "A").await;
        dir.record_holder("report.pdf", "A").await;
        dir.record_holder("report.pdf", "B").await;
        dir.record_holder("report.pdf", "A").await;

        assert_eq!(dir.holders_of("report.pdf").await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_holders_preserve_insertion_order() {
        let dir = Directory::new();
        for id in ["C", "A", "B"] {
            dir.record_holder("x.bin", id).await;
        }
        assert_eq!(dir.holders_of("x.bin").await, vec!["C", "A", "B"]);
    }

    #[tokio::test]
    async fn test_unknown_file_has_no_holders() {
        let dir = Directory::new();
        assert!(dir.holders_of("nope.txt").await.is_empty());
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let dir = Directory::new();
        let (h, _rx) = handle("A");
        let conn_id = h.conn_id;

        assert!(matches!(dir.register_node(h, 8).await, Registration::New));
        assert_eq!(dir.online_count().await, 1);
        assert!(dir.live_session_of("A").await.is_some());

        assert!(dir.unregister_node("A", conn_id).await);
        assert_eq!(dir.online_count().await, 0);
        assert!(dir.live_session_of("A").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_register_evicts_old_session() {
        let dir = Directory::new();
        let (old, _old_rx) = handle("A");
        let old_conn = old.conn_id;
        let (new, _new_rx) = handle("A");
        let new_conn = new.conn_id;

        dir.register_node(old, 8).await;
        let result = dir.register_node(new, 8).await;
        let Registration::Evicted(evicted) = result else {
            panic!("expected eviction");
        };
        assert_eq!(evicted.conn_id, old_conn);

        // The evicted session's cleanup must not unregister the replacement.
        assert!(!dir.unregister_node("A", old_conn).await);
        assert!(dir.live_session_of("A").await.is_some());

        assert!(dir.unregister_node("A", new_conn).await);
        assert!(dir.live_session_of("A").await.is_none());
    }

    #[tokio::test]
    async fn test_register_at_capacity_rejects_new_id() {
        let dir = Directory::new();
        let (a, _a_rx) = handle("A");
        let (b, _b_rx) = handle("B");

        assert!(matches!(dir.register_node(a, 1).await, Registration::New));
        assert!(matches!(dir.register_node(b, 1).await, Registration::Full));
        assert_eq!(dir.online_count().await, 1);
        assert!(dir.live_session_of("B").await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_evicts_even_at_capacity() {
        let dir = Directory::new();
        let (old, _old_rx) = handle("A");
        let (new, _new_rx) = handle("A");
        let new_conn = new.conn_id;

        dir.register_node(old, 1).await;
        // Re-registering a live identifier does not add a session, so a full
        // server still lets the node reconnect.
        assert!(matches!(dir.register_node(new, 1).await, Registration::Evicted(_)));
        assert_eq!(dir.online_count().await, 1);
        assert_eq!(
            dir.live_session_of("A").await.map(|s| s.conn_id),
            Some(new_conn)
        );
    }

    #[tokio::test]
    async fn test_disconnect_leaves_holder_entries() {
        let dir = Directory::new();
        let (h, _rx) = handle("A");
        let conn_id = h.conn_id;

        dir.register_node(h, 8).await;
        dir.record_holder("report.pdf", "A").await;
        dir.unregister_node("A", conn_id).await;

        assert!(dir.snapshot_connected_nodes().await.is_empty());
        assert_eq!(dir.holders_of("report.pdf").await, vec!["A"]);
    }

    #[tokio::test]
    async fn test_send_fails_after_receiver_dropped() {
        let (h, rx) = handle("A");
        assert!(h.is_live());
        drop(rx);
        assert!(!h.is_live());
        assert!(!h.send(BytesMut::from(&b"x"[..])));
    }
}

//! Connection registry.
//!
//! Tracks the live channel of every connected execution context. The map is
//! only mutated on connect and disconnect; broadcast works on a snapshot so
//! that concurrent (un)registration never affects an ongoing delivery.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use nokey_proto::Outbound;

use crate::errors::ChannelError;

/// Identifier of one connection, unique for the lifetime of a hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outgoing half of a duplex channel to one execution context.
///
/// Implementations must not wait on a peer that has stopped reading: a
/// broadcast waits on every target, so one stalled send stalls the relay.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, envelope: &Outbound) -> Result<(), ChannelError>;
}

/// [`Channel`] backed by a bounded tokio mpsc queue.
///
/// Sends never wait: when the queue is full the envelope is dropped for this
/// context and [`ChannelError::Full`] is returned.
#[derive(Debug, Clone)]
pub struct MpscChannel {
    tx: mpsc::Sender<Outbound>,
}

impl MpscChannel {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    /// Channel plus the receiver the context reads from.
    pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Channel for MpscChannel {
    async fn send(&self, envelope: &Outbound) -> Result<(), ChannelError> {
        self.tx.try_send(envelope.clone()).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::Disconnected,
        })
    }
}

/// A registered execution context.
pub struct Connection {
    pub id: ConnectionId,
    /// Free-form label of the peer (port name, page URL, frame id).
    pub origin: String,
    channel: Arc<dyn Channel>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub async fn send(&self, envelope: &Outbound) -> Result<(), ChannelError> {
        self.channel.send(envelope).await
    }
}

/// Registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an unused connection id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Add (or replace) the connection with this id.
    pub fn register(
        &self,
        id: ConnectionId,
        origin: impl Into<String>,
        channel: Arc<dyn Channel>,
    ) -> Arc<Connection> {
        let connection = Arc::new(Connection {
            id,
            origin: origin.into(),
            channel,
        });
        if self.connections.insert(id, Arc::clone(&connection)).is_some() {
            debug!(connection_id = %id, "connection re-registered");
        } else {
            debug!(connection_id = %id, origin = %connection.origin, "connection registered");
        }
        connection
    }

    /// Allocate an id and register under it.
    pub fn connect(&self, origin: impl Into<String>, channel: Arc<dyn Channel>) -> ConnectionId {
        let id = self.next_id();
        self.register(id, origin, channel);
        id
    }

    /// Remove a connection. Returns whether it was present.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            debug!(connection_id = %id, "connection unregistered");
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Immutable copy of the current connections.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    async fn deliver(targets: Vec<Arc<Connection>>, envelope: &Outbound) -> usize {
        let results = join_all(targets.iter().map(|conn| conn.send(envelope))).await;
        let mut delivered = 0;
        for (conn, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %conn.id, envelope = envelope.tag(), "send failed: {e}")
                }
            }
        }
        delivered
    }

    /// Send to every connection. A failing connection does not affect the
    /// others; it stays registered until its disconnect is signalled.
    ///
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, envelope: &Outbound) -> usize {
        Self::deliver(self.snapshot(), envelope).await
    }

    /// Send to every connection except `skip`.
    pub async fn broadcast_except(&self, skip: ConnectionId, envelope: &Outbound) -> usize {
        let targets = self
            .snapshot()
            .into_iter()
            .filter(|conn| conn.id != skip)
            .collect();
        Self::deliver(targets, envelope).await
    }

    /// Unicast. Unknown ids and failed sends are dropped; returns whether
    /// the envelope was delivered.
    pub async fn send_to(&self, id: ConnectionId, envelope: &Outbound) -> bool {
        // Clone out of the map so no shard lock is held across the await.
        let connection = self.connections.get(&id).map(|entry| Arc::clone(entry.value()));
        let Some(connection) = connection else {
            debug!(connection_id = %id, envelope = envelope.tag(), "dropping reply to unknown connection");
            return false;
        };
        match connection.send(envelope).await {
            Ok(()) => true,
            Err(e) => {
                warn!(connection_id = %id, envelope = envelope.tag(), "send failed: {e}");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingChannel;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_isolates_failures() {
        let registry = ConnectionRegistry::new();
        let a = Arc::new(RecordingChannel::default());
        let b = Arc::new(RecordingChannel::failing());
        let c = Arc::new(RecordingChannel::default());
        registry.connect("a", a.clone());
        registry.connect("b", b.clone());
        registry.connect("c", c.clone());

        let delivered = registry.broadcast(&Outbound::NewState(json!({ "n": 1 }))).await;
        assert_eq!(delivered, 2);
        assert_eq!(a.tags(), vec!["onNewState"]);
        assert_eq!(c.tags(), vec!["onNewState"]);
        // Failure does not unregister synchronously.
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_register_unregister_idempotent() {
        let registry = ConnectionRegistry::new();
        let chan = Arc::new(RecordingChannel::default());
        let id = ConnectionId(7);
        registry.register(id, "popup", chan.clone());
        registry.register(id, "popup", chan);
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_unknown_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to(ConnectionId(99), &Outbound::OpenPopup).await);
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_origin() {
        let registry = ConnectionRegistry::new();
        let a = Arc::new(RecordingChannel::default());
        let b = Arc::new(RecordingChannel::default());
        let ida = registry.connect("a", a.clone());
        registry.connect("b", b.clone());
        assert_eq!(registry.broadcast_except(ida, &Outbound::ClosePopup).await, 1);
        assert!(a.tags().is_empty());
        assert_eq!(b.tags(), vec!["closePopup"]);
    }

    #[tokio::test]
    async fn test_mpsc_channel_reports_disconnect() {
        let (chan, rx) = MpscChannel::pair(4);
        chan.send(&Outbound::OpenPopup).await.unwrap();
        drop(rx);
        assert_eq!(
            chan.send(&Outbound::OpenPopup).await,
            Err(ChannelError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_broadcast() {
        let registry = ConnectionRegistry::new();
        let (stalled, _stalled_rx) = MpscChannel::pair(1);
        let (healthy, mut healthy_rx) = MpscChannel::pair(16);
        registry.connect("stalled", Arc::new(stalled.clone()));
        registry.connect("healthy", Arc::new(healthy));

        assert_eq!(registry.broadcast(&Outbound::OpenPopup).await, 2);
        let second = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            registry.broadcast(&Outbound::ClosePopup),
        )
        .await
        .expect("broadcast waited on a full queue");
        assert_eq!(second, 1);
        assert_eq!(stalled.send(&Outbound::OpenPopup).await, Err(ChannelError::Full));

        assert_eq!(healthy_rx.recv().await, Some(Outbound::OpenPopup));
        assert_eq!(healthy_rx.recv().await, Some(Outbound::ClosePopup));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_are_unique_and_sorted() {
        let registry = ConnectionRegistry::new();
        let chan: Arc<dyn Channel> = Arc::new(RecordingChannel::default());
        let first = registry.connect("x", Arc::clone(&chan));
        let second = registry.connect("y", chan);
        assert_ne!(first, second);
        assert_eq!(registry.ids(), vec![first, second]);
    }
}

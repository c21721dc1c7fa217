//! In-process endpoints backed by tokio channels.
//!
//! Stand-ins for the host messaging primitives when every context
//! runs in one process: the demo wires a full page/relay/hub topology
//! with these, and the end-to-end tests ride them as well.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BusError, BusResult};
use crate::message::Message;
use crate::port::{
    HubInbound, HubLink, PagePost, PeerDirectory, PeerFilter, PeerId, PeerRef, Reply, ReplyResult,
};

/// One side of an in-process page transport.
pub struct PageEndpoint {
    pub post: MemPost,
    pub inbound: mpsc::UnboundedReceiver<Value>,
}

/// Crossed pair of endpoints standing in for a shared page transport:
/// values posted on one side arrive on the other.
pub fn page_pair() -> (PageEndpoint, PageEndpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        PageEndpoint {
            post: MemPost { tx: b_tx },
            inbound: a_rx,
        },
        PageEndpoint {
            post: MemPost { tx: a_tx },
            inbound: b_rx,
        },
    )
}

/// Posts raw values to the opposite endpoint of a [`page_pair`].
#[derive(Clone)]
pub struct MemPost {
    tx: mpsc::UnboundedSender<Value>,
}

#[async_trait]
impl PagePost for MemPost {
    async fn post(&self, raw: Value) -> BusResult<()> {
        self.tx
            .send(raw)
            .map_err(|_| BusError::Transport("page endpoint closed".into()))
    }
}

/// Relay-side link into an in-process hub: every request is tagged
/// with the connecting peer and answered through a fresh reply slot.
#[derive(Clone)]
pub struct MemHubLink {
    peer: PeerRef,
    tx: mpsc::UnboundedSender<HubInbound>,
}

impl MemHubLink {
    pub fn new(peer: PeerRef, tx: mpsc::UnboundedSender<HubInbound>) -> Self {
        Self { peer, tx }
    }
}

#[async_trait]
impl HubLink for MemHubLink {
    async fn request(&self, message: Message) -> BusResult<ReplyResult> {
        let (reply, rx) = Reply::channel();
        self.tx
            .send(HubInbound {
                message,
                peer: self.peer.clone(),
                reply: Some(reply),
            })
            .map_err(|_| BusError::Transport("hub inbound queue closed".into()))?;
        rx.await.map_err(|_| BusError::ReplyDropped)
    }
}

struct PeerSlot {
    peer: PeerRef,
    tx: mpsc::UnboundedSender<Message>,
}

/// Registration table of connected peers with per-peer delivery queues.
#[derive(Clone, Default)]
pub struct MemPeerDirectory {
    peers: Arc<Mutex<HashMap<PeerId, PeerSlot>>>,
}

impl MemPeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a peer; the returned receiver carries hub-initiated
    /// messages addressed to it.
    pub fn connect(&self, peer: PeerRef) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(peer = peer.id, origin = %peer.origin, "peer connected");
        peers.insert(peer.id, PeerSlot { peer, tx });
        rx
    }

    /// Drop a peer from the table; later sends to it fail.
    pub fn disconnect(&self, peer: PeerId) {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        if peers.remove(&peer).is_some() {
            debug!(peer, "peer disconnected");
        }
    }
}

#[async_trait]
impl PeerDirectory for MemPeerDirectory {
    async fn query_peers(&self, filter: Option<&PeerFilter>) -> BusResult<Vec<PeerRef>> {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        let origin = filter.and_then(|f| f.origin.as_deref());
        Ok(peers
            .values()
            .map(|slot| slot.peer.clone())
            .filter(|peer| origin.map_or(true, |o| peer.origin == o))
            .collect())
    }

    async fn send_to_peer(&self, peer: PeerId, message: Message) -> BusResult<()> {
        let tx = {
            let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            peers.get(&peer).map(|slot| slot.tx.clone())
        };
        match tx {
            Some(tx) => tx.send(message).map_err(|_| BusError::PeerGone(peer)),
            None => Err(BusError::PeerGone(peer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EventType, RequestType};
    use serde_json::json;

    #[tokio::test]
    async fn page_pair_crosses_sides() {
        let (mut page, mut relay) = page_pair();

        page.post.post(json!("from page")).await.unwrap();
        relay.post.post(json!("from relay")).await.unwrap();

        assert_eq!(relay.inbound.recv().await.unwrap(), json!("from page"));
        assert_eq!(page.inbound.recv().await.unwrap(), json!("from relay"));
    }

    #[tokio::test]
    async fn hub_link_round_trip() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = MemHubLink::new(PeerRef::new(7, "https://a.example"), tx);

        let answer = tokio::spawn(async move {
            let inbound = rx.recv().await.unwrap();
            assert_eq!(inbound.peer.id, 7);
            assert!(inbound.message.is_request());
            inbound.reply.unwrap().send(Ok(json!("done")));
        });

        let request = Message::request(RequestType::Connect, json!(null));
        let reply = link.request(request).await.unwrap();
        assert_eq!(reply, Ok(json!("done")));
        answer.await.unwrap();
    }

    #[tokio::test]
    async fn unanswered_request_reports_dropped_reply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = MemHubLink::new(PeerRef::new(1, "https://a.example"), tx);

        let drain = tokio::spawn(async move {
            // Take the delivery and drop its reply without answering.
            let _ = rx.recv().await.unwrap();
        });

        let request = Message::request(RequestType::GetAccounts, json!(null));
        let err = link.request(request).await.unwrap_err();
        assert!(matches!(err, BusError::ReplyDropped));
        drain.await.unwrap();
    }

    #[tokio::test]
    async fn directory_filters_by_origin() {
        let directory = MemPeerDirectory::new();
        let _a = directory.connect(PeerRef::new(1, "https://a.example"));
        let _b = directory.connect(PeerRef::new(2, "https://b.example"));

        let all = directory.query_peers(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filter = PeerFilter {
            origin: Some("https://b.example".into()),
        };
        let only_b = directory.query_peers(Some(&filter)).await.unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].id, 2);
    }

    #[tokio::test]
    async fn sends_to_disconnected_peers_fail() {
        let directory = MemPeerDirectory::new();
        let mut rx = directory.connect(PeerRef::new(3, "https://a.example"));

        let event = Message::event(EventType::AccountsChanged, json!(null));
        directory.send_to_peer(3, event.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);

        directory.disconnect(3);
        let err = directory.send_to_peer(3, event).await.unwrap_err();
        assert!(matches!(err, BusError::PeerGone(3)));
    }
}

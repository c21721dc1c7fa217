//! Port traits through which the bus touches its host environment.
//!
//! The bus never owns a real transport. The page side is handed a
//! post primitive plus a stream of raw inbound values, the relay a
//! privileged send-with-reply link, and the hub a peer directory.
//! Everything behind these seams is ordinary host machinery.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::BusResult;
use crate::message::Message;

/// Opaque identifier of one connected page context.
pub type PeerId = u64;

/// Account address as the surrounding application renders it.
pub type AccountAddress = String;

/// One connected page context: an opaque id plus its origin URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRef {
    pub id: PeerId,
    pub origin: String,
}

impl PeerRef {
    pub fn new(id: PeerId, origin: impl Into<String>) -> Self {
        Self {
            id,
            origin: origin.into(),
        }
    }
}

/// What a request handler sends back: a payload, or the error string
/// that becomes an `Error` envelope at the bridge.
pub type ReplyResult = Result<Value, String>;

/// First-write-wins capability for answering one request.
///
/// Clones share the same slot: when several subscribers are handed the
/// capability for the same request, only the first answer is
/// delivered and later ones are dropped.
#[derive(Clone)]
pub struct Reply {
    slot: Arc<Mutex<Option<oneshot::Sender<ReplyResult>>>>,
}

impl Reply {
    /// Create a reply capability and the receiver its answer arrives on.
    pub fn channel() -> (Self, oneshot::Receiver<ReplyResult>) {
        let (tx, rx) = oneshot::channel();
        let reply = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (reply, rx)
    }

    /// Answer the request. Returns false when an answer was already
    /// sent, or when nobody is waiting anymore.
    pub fn send(&self, result: ReplyResult) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Reply")
    }
}

/// Fire-and-forget post into a page context.
///
/// The receiving side is a plain stream of raw values: the transport
/// is shared with unrelated browser machinery, so consumers filter
/// with [`Message::from_wire`].
#[async_trait]
pub trait PagePost: Send + Sync {
    async fn post(&self, raw: Value) -> BusResult<()>;
}

/// The relay's privileged link to the backend: send one message and
/// await the backend's asynchronous reply.
#[async_trait]
pub trait HubLink: Send + Sync {
    async fn request(&self, message: Message) -> BusResult<ReplyResult>;
}

/// One message arriving at the hub, tagged with its sender and the
/// capability to answer it.
#[derive(Debug)]
pub struct HubInbound {
    pub message: Message,
    pub peer: PeerRef,
    pub reply: Option<Reply>,
}

/// Filter for peer enumeration.
#[derive(Debug, Clone, Default)]
pub struct PeerFilter {
    /// Restrict to peers whose origin URL matches exactly.
    pub origin: Option<String>,
}

/// Enumeration of, and delivery to, currently connected peers.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Enumerate connected peers, optionally filtered.
    async fn query_peers(&self, filter: Option<&PeerFilter>) -> BusResult<Vec<PeerRef>>;

    /// Deliver a message to one specific peer.
    ///
    /// Fails when the peer has disconnected; broadcast callers treat
    /// that as expected and swallow it.
    async fn send_to_peer(&self, peer: PeerId, message: Message) -> BusResult<()>;
}

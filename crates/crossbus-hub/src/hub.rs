//! The backend hub.
//!
//! Receives requests with a reply capability, dispatches them to
//! registered handlers, and broadcasts events to the subset of
//! connected peers the allowlist admits for the currently selected
//! account.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crossbus_core::{
    BusError, BusResult, Delivery, EventType, HubInbound, Message, PeerDirectory, PeerFilter,
    PeerRef, Reply, RequestType, Subscription, SubscriptionRegistry,
};

use crate::allowlist::{AllowlistStore, SelectedAccountStore};

/// Origin recorded on requests the hub sends to itself.
const INTERNAL_ORIGIN: &str = "crossbus:internal";

/// Options controlling `broadcast` membership.
#[derive(Default)]
pub struct BroadcastOptions {
    /// When true, every connected peer is treated as allowed. The
    /// allowlist is still consulted so excluded peers can be reported.
    pub skip_allowlist: bool,
    /// Invoked once for each peer the allowlist excludes, whether or
    /// not the allowlist requirement is enabled.
    pub on_excluded: Option<Box<dyn Fn(&PeerRef) + Send + Sync>>,
}

/// Authoritative request handling and peer-filtered event broadcast.
pub struct BackendHub {
    registry: SubscriptionRegistry,
    peers: Arc<dyn PeerDirectory>,
    allowlist: Arc<dyn AllowlistStore>,
    selected: Arc<dyn SelectedAccountStore>,
}

impl BackendHub {
    pub fn new(
        peers: Arc<dyn PeerDirectory>,
        allowlist: Arc<dyn AllowlistStore>,
        selected: Arc<dyn SelectedAccountStore>,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            peers,
            allowlist,
            selected,
        }
    }

    /// Register a persistent request handler.
    ///
    /// Handlers always receive the sending peer and a reply
    /// capability; a delivery missing either is a wiring bug and
    /// panics. A handler that returns an error without having replied
    /// answers its request with that error.
    pub fn handle_request<P, F>(&self, predicate: P, handler: F) -> Subscription
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        F: Fn(Message, PeerRef, Reply) -> BusResult<()> + Send + Sync + 'static,
    {
        self.registry
            .subscribe(predicate, demand_capabilities(handler))
    }

    /// One-shot variant of [`BackendHub::handle_request`].
    pub fn handle_request_once<P, F>(&self, predicate: P, handler: F) -> Subscription
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        F: Fn(Message, PeerRef, Reply) -> BusResult<()> + Send + Sync + 'static,
    {
        self.registry
            .subscribe_once(predicate, demand_capabilities(handler))
    }

    /// Drain transport deliveries into the registry until the queue
    /// closes. Non-request traffic is dropped.
    pub fn attach(&self, mut inbound: mpsc::UnboundedReceiver<HubInbound>) -> tokio::task::JoinHandle<()> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            while let Some(HubInbound {
                message,
                peer,
                reply,
            }) = inbound.recv().await
            {
                if !message.is_request() {
                    trace!("dropping non-request hub traffic");
                    continue;
                }
                let matched = registry.dispatch(&message, Some(&peer), reply);
                if matched == 0 {
                    debug!(origin = %peer.origin, "request matched no handler");
                }
            }
            trace!("hub inbound queue closed");
        })
    }

    /// Send a request to the hub's own handlers and await the reply.
    ///
    /// Backend-to-backend signalling that never crosses the page
    /// boundary.
    pub async fn send_internal(
        &self,
        request_type: RequestType,
        payload: Value,
    ) -> BusResult<Value> {
        let request = Message::request(request_type, payload);
        let (reply, rx) = Reply::channel();
        let peer = PeerRef::new(0, INTERNAL_ORIGIN);
        self.registry.dispatch(&request, Some(&peer), Some(reply));
        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(error)) => Err(BusError::Rejected(error)),
            Err(_) => Err(BusError::ReplyDropped),
        }
    }

    /// Broadcast an event to the connected peers the allowlist admits.
    ///
    /// Membership is the intersection of each peer's origin entry with
    /// the account selected at call time; with `skip_allowlist` every
    /// connected peer is delivered to. Excluded peers are reported
    /// through `on_excluded` in either mode. Per-peer delivery
    /// failures are expected (peers disconnect at will) and swallowed;
    /// the returned future resolves once every send was attempted.
    pub async fn broadcast(
        &self,
        event_type: EventType,
        payload: Value,
        options: BroadcastOptions,
    ) -> BusResult<()> {
        let peers = self.peers.query_peers(None).await?;
        let allowlist = self.allowlist.get().await?;
        let selected = self.selected.get().await?;
        let event = Message::event(event_type, payload);

        for peer in peers {
            let allowed = match (&selected, allowlist.get(&peer.origin)) {
                (Some(account), Some(accounts)) => accounts.contains(account),
                _ => false,
            };

            if !allowed {
                if let Some(callback) = &options.on_excluded {
                    callback(&peer);
                }
                if !options.skip_allowlist {
                    continue;
                }
            }

            if let Err(e) = self.peers.send_to_peer(peer.id, event.clone()).await {
                debug!(peer = peer.id, origin = %peer.origin, error = %e, "broadcast delivery failed");
            }
        }
        Ok(())
    }

    /// Deliver an event to every peer currently on `origin`, bypassing
    /// the allowlist. Returns once every send was attempted.
    pub async fn broadcast_to_origin(
        &self,
        event_type: EventType,
        origin: &str,
        payload: Value,
    ) -> BusResult<()> {
        let filter = PeerFilter {
            origin: Some(origin.to_string()),
        };
        let peers = self.peers.query_peers(Some(&filter)).await?;
        let event = Message::event(event_type, payload);

        for peer in peers {
            if let Err(e) = self.peers.send_to_peer(peer.id, event.clone()).await {
                debug!(peer = peer.id, error = %e, "origin broadcast delivery failed");
            }
        }
        Ok(())
    }
}

/// Adapt a `(message, peer, reply)` handler to a registry handler,
/// failing fast when the wiring did not supply the capabilities.
fn demand_capabilities<F>(handler: F) -> impl Fn(Delivery) -> BusResult<()> + Send + Sync + 'static
where
    F: Fn(Message, PeerRef, Reply) -> BusResult<()> + Send + Sync + 'static,
{
    move |delivery: Delivery| {
        let Delivery {
            message,
            peer,
            reply,
        } = delivery;
        let (Some(peer), Some(reply)) = (peer, reply) else {
            panic!("request handler invoked without peer/reply capabilities");
        };

        let fault_reply = reply.clone();
        if let Err(e) = handler(message, peer, reply) {
            // A faulting handler answers its own request.
            fault_reply.send(Err(e.to_string()));
            return Err(e);
        }
        Ok(())
    }
}

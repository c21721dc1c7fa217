//! The page-side client.
//!
//! `PageClient` owns a subscription registry fed by a pump task that
//! drops any transport value not carrying the protocol marker. Each
//! outgoing call installs a one-shot registration keyed to its own
//! correlation id, so any number of calls may be in flight at once
//! with no ordering between them.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crossbus_core::{
    BusError, BusResult, EventType, Message, PagePost, RequestType, Subscription,
    SubscriptionRegistry,
};

/// Client handle for code running in the page sandbox.
pub struct PageClient {
    post: Arc<dyn PagePost>,
    registry: SubscriptionRegistry,
    pump: tokio::task::JoinHandle<()>,
}

impl PageClient {
    /// Wire a client to its outbound post primitive and the raw
    /// inbound stream of the shared transport.
    pub fn new(post: Arc<dyn PagePost>, mut inbound: mpsc::UnboundedReceiver<Value>) -> Self {
        let registry = SubscriptionRegistry::new();
        let pump = {
            let registry = registry.clone();
            tokio::spawn(async move {
                while let Some(raw) = inbound.recv().await {
                    match Message::from_wire(&raw) {
                        Some(message) => {
                            registry.dispatch(&message, None, None);
                        }
                        None => trace!("ignoring foreign transport value"),
                    }
                }
                trace!("page inbound stream ended");
            })
        };
        Self {
            post,
            registry,
            pump,
        }
    }

    /// Issue a request and await its single terminal answer.
    ///
    /// Resolves with the `Response` payload, or fails with
    /// [`BusError::Rejected`] carrying the `Error` envelope's string.
    /// There is no timeout: when neither answer ever arrives for this
    /// correlation id, the future never completes. A caller that gives
    /// up by dropping the future leaves the one-shot registration
    /// behind.
    pub async fn call(&self, request_type: RequestType, payload: Value) -> BusResult<Value> {
        let request = Message::request(request_type, payload);
        let correlation_id = match request.correlation_id() {
            Some(id) => id,
            None => unreachable!("a freshly built request always carries its correlation id"),
        };

        let (tx, rx) = oneshot::channel::<Result<Value, String>>();
        let slot = Mutex::new(Some(tx));
        self.registry.subscribe_once(
            move |m| {
                m.correlation_id() == Some(correlation_id) && (m.is_response() || m.is_error())
            },
            move |delivery| {
                let outcome = match delivery.message {
                    Message::Response { payload, .. } => Ok(payload),
                    Message::Error { error, .. } => Err(error),
                    _ => return Ok(()),
                };
                if let Some(tx) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    let _ = tx.send(outcome);
                }
                Ok(())
            },
        );

        self.post.post(request.to_wire()?).await?;

        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(error)) => Err(BusError::Rejected(error)),
            Err(_) => Err(BusError::ReplyDropped),
        }
    }

    /// Register a persistent listener for one event type. The handler
    /// receives the event payload.
    ///
    /// The returned capability is the only way to stop delivery;
    /// dropping it leaves the listener registered.
    pub fn on<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(Value) -> BusResult<()> + Send + Sync + 'static,
    {
        self.registry.subscribe(
            move |m| matches!(m, Message::Event { event_type: et, .. } if *et == event_type),
            move |delivery| match delivery.message {
                Message::Event { payload, .. } => handler(payload),
                _ => Ok(()),
            },
        )
    }

    /// Number of live registrations, pending calls included.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for PageClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

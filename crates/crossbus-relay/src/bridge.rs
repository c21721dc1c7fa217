//! The relay bridge.
//!
//! Inbound direction: page requests are forwarded verbatim to the
//! backend, and whatever comes back (a payload, a handler error
//! string, or a failure of the backend call itself) is re-emitted on
//! the page transport under the request's own correlation id.
//! Outbound direction: backend events are forwarded unchanged. The
//! backend never initiates page-directed requests.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crossbus_core::{BusResult, HubLink, Message, PagePost};

/// Bridges one page context to the backend.
///
/// Holds no per-request state: correlation stays with the page client,
/// and every forwarded request is answered through the correlation id
/// it already carries.
pub struct RelayBridge {
    page: Arc<dyn PagePost>,
    hub: Arc<dyn HubLink>,
}

impl RelayBridge {
    pub fn new(page: Arc<dyn PagePost>, hub: Arc<dyn HubLink>) -> Self {
        Self { page, hub }
    }

    /// Drive both directions until either side's stream ends.
    ///
    /// `from_page` carries the raw values posted in the page context;
    /// `from_hub` carries hub-initiated messages for this peer.
    pub async fn run(
        self,
        mut from_page: mpsc::UnboundedReceiver<Value>,
        mut from_hub: mpsc::UnboundedReceiver<Message>,
    ) {
        loop {
            tokio::select! {
                raw = from_page.recv() => match raw {
                    Some(raw) => self.page_to_hub(raw),
                    None => break,
                },
                message = from_hub.recv() => match message {
                    Some(message) => self.hub_to_page(message).await,
                    None => break,
                },
            }
        }
        trace!("relay bridge stopped");
    }

    /// Forward one page request to the hub on its own task, so a slow
    /// handler never stalls the loop or the other direction.
    fn page_to_hub(&self, raw: Value) {
        let Some(message) = Message::from_wire(&raw) else {
            trace!("ignoring foreign transport value");
            return;
        };
        let correlation_id = match message.correlation_id() {
            Some(id) if message.is_request() => id,
            _ => {
                trace!("dropping non-request page traffic");
                return;
            }
        };

        let page = self.page.clone();
        let hub = self.hub.clone();
        tokio::spawn(async move {
            let answer = match hub.request(message).await {
                Ok(Ok(payload)) => Message::response(correlation_id, payload),
                Ok(Err(error)) => Message::error(correlation_id, error),
                Err(e) => Message::error(correlation_id, e.to_string()),
            };
            if let Err(e) = post(&page, answer).await {
                warn!(error = %e, "failed to post answer to page");
            }
        });
    }

    /// Forward hub-initiated events to the page verbatim.
    async fn hub_to_page(&self, message: Message) {
        if !message.is_event() {
            debug!("dropping non-event hub traffic");
            return;
        }
        if let Err(e) = post(&self.page, message).await {
            warn!(error = %e, "failed to forward event to page");
        }
    }
}

async fn post(page: &Arc<dyn PagePost>, message: Message) -> BusResult<()> {
    page.post(message.to_wire()?).await
}

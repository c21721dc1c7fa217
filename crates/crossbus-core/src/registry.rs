//! Subscription registry: decouples "what arrived on the transport"
//! from "who cares about it".
//!
//! Every node role owns its own registry instance; there is no global
//! subscriber state. Entries live in an arena keyed by stable ids. A
//! one-shot entry is removed before its handler runs, so a faulty
//! handler can never leave a matched one-shot registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{trace, warn};

use crate::error::BusError;
use crate::message::Message;
use crate::port::{PeerRef, Reply};

/// Stable handle of one registration.
pub type SubscriptionId = u64;

/// Whether a registration survives its first matching delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Once,
    Persistent,
}

/// One delivered message plus the capabilities that arrived with it.
///
/// Page-side deliveries carry neither peer nor reply; hub-side request
/// deliveries carry both.
pub struct Delivery {
    pub message: Message,
    pub peer: Option<PeerRef>,
    pub reply: Option<Reply>,
}

type Predicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;
type Handler = Arc<dyn Fn(Delivery) -> Result<(), BusError> + Send + Sync>;
type EntryMap = HashMap<SubscriptionId, Entry>;

struct Entry {
    predicate: Predicate,
    handler: Handler,
    mode: DeliveryMode,
}

/// Arena of predicate/handler registrations with stable handles.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<Mutex<EntryMap>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent handler. The returned capability is the
    /// only way to deregister it.
    pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> Subscription
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        H: Fn(Delivery) -> Result<(), BusError> + Send + Sync + 'static,
    {
        self.register(Box::new(predicate), Arc::new(handler), DeliveryMode::Persistent)
    }

    /// Register a handler that fires at most once.
    ///
    /// The registration is removed before the handler runs on its
    /// first match. The returned capability cancels it if invoked
    /// before any match arrives.
    pub fn subscribe_once<P, H>(&self, predicate: P, handler: H) -> Subscription
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        H: Fn(Delivery) -> Result<(), BusError> + Send + Sync + 'static,
    {
        self.register(Box::new(predicate), Arc::new(handler), DeliveryMode::Once)
    }

    fn register(&self, predicate: Predicate, handler: Handler, mode: DeliveryMode) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            id,
            Entry {
                predicate,
                handler,
                mode,
            },
        );
        trace!(id, ?mode, "subscription registered");
        Subscription {
            id,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Deliver `message` to every matching registration.
    ///
    /// Matching one-shot entries are deregistered before any handler
    /// runs. Handlers run outside the registry lock, in unspecified
    /// order; a handler error is logged and never stops the fan-out.
    /// Returns how many registrations matched.
    pub fn dispatch(
        &self,
        message: &Message,
        peer: Option<&PeerRef>,
        reply: Option<Reply>,
    ) -> usize {
        let matched: Vec<Handler> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<SubscriptionId> = entries
                .iter()
                .filter(|(_, entry)| (entry.predicate)(message))
                .map(|(id, _)| *id)
                .collect();

            let mut matched = Vec::with_capacity(ids.len());
            for id in ids {
                let once = entries
                    .get(&id)
                    .is_some_and(|entry| entry.mode == DeliveryMode::Once);
                if once {
                    if let Some(entry) = entries.remove(&id) {
                        matched.push(entry.handler);
                    }
                } else if let Some(entry) = entries.get(&id) {
                    matched.push(entry.handler.clone());
                }
            }
            matched
        };

        let count = matched.len();
        for handler in &matched {
            let delivery = Delivery {
                message: message.clone(),
                peer: peer.cloned(),
                reply: reply.clone(),
            };
            if let Err(e) = handler(delivery) {
                warn!(error = %e, "subscriber failed");
            }
        }
        count
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability to deregister exactly one registration.
///
/// Dropping the handle does NOT deregister; cancellation is always an
/// explicit call, and calling it twice is a no-op.
pub struct Subscription {
    id: SubscriptionId,
    entries: Weak<Mutex<EntryMap>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(entries) = self.entries.upgrade() {
            let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.remove(&self.id).is_some() {
                trace!(id = self.id, "subscription removed");
            }
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EventType, RequestType};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn counter_handler(counter: Arc<AtomicU32>) -> impl Fn(Delivery) -> Result<(), BusError> {
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn persistent_fires_on_every_match() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        registry.subscribe(|m| m.is_event(), counter_handler(counter.clone()));

        let event = Message::event(EventType::AccountsChanged, json!(null));
        registry.dispatch(&event, None, None);
        registry.dispatch(&event, None, None);

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_fires_exactly_once() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        registry.subscribe_once(|m| m.is_event(), counter_handler(counter.clone()));

        let event = Message::event(EventType::AccountsChanged, json!(null));
        assert_eq!(registry.dispatch(&event, None, None), 1);
        assert_eq!(registry.dispatch(&event, None, None), 0);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn once_is_removed_before_its_handler_runs() {
        // A handler that synchronously re-dispatches a matching message
        // must not see itself fire again.
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        let inner = registry.clone();
        let inner_counter = counter.clone();
        registry.subscribe_once(
            |m| m.is_event(),
            move |delivery| {
                inner_counter.fetch_add(1, Ordering::SeqCst);
                inner.dispatch(&delivery.message, None, None);
                Ok(())
            },
        );

        registry.dispatch(&Message::event(EventType::NetworkChanged, json!(null)), None, None);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        let subscription = registry.subscribe(|m| m.is_event(), counter_handler(counter.clone()));

        subscription.unsubscribe();
        subscription.unsubscribe();

        registry.dispatch(&Message::event(EventType::AccountsChanged, json!(null)), None, None);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn once_cancelled_before_first_match_never_fires() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        let subscription =
            registry.subscribe_once(|m| m.is_response(), counter_handler(counter.clone()));

        subscription.unsubscribe();
        registry.dispatch(
            &Message::response(uuid::Uuid::new_v4(), json!(null)),
            None,
            None,
        );
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_handler_does_not_stop_fan_out() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));

        registry.subscribe(
            |m| m.is_request(),
            |_| Err(BusError::Subscriber("deliberate".into())),
        );
        registry.subscribe(|m| m.is_request(), counter_handler(counter.clone()));

        let request = Message::request(RequestType::Connect, json!(null));
        assert_eq!(registry.dispatch(&request, None, None), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_matches_by_predicate_not_registration_order() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicU32::new(0));
        registry.subscribe(|m| m.is_event(), counter_handler(hits.clone()));
        registry.subscribe(|m| m.is_request(), counter_handler(hits.clone()));

        registry.dispatch(&Message::event(EventType::PermissionRevoked, json!(null)), None, None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

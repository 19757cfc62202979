//! In-process event bus
//!
//! Routes each server-pushed [`Event`] to the handlers subscribed to its
//! [`EventType`]. Delivery is synchronous, in the emitting task, in
//! subscriber-registration order. A panicking handler is isolated and does
//! not prevent delivery to the handlers registered after it. There is no
//! replay: events emitted before a subscription exist only for the
//! subscribers registered at that moment.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::models::{Event, EventType};

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    event_type: EventType,
    seq: u64,
}

struct Subscriber {
    seq: u64,
    handler: Handler,
}

struct BusInner {
    next_seq: u64,
    subscribers: HashMap<EventType, Vec<Subscriber>>,
}

/// Typed publish/subscribe router for server events
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_seq: 0,
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Register a handler for one event type
    ///
    /// Handlers registered first are invoked first.
    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .subscribers
            .entry(event_type)
            .or_default()
            .push(Subscriber {
                seq,
                handler: Arc::new(handler),
            });
        SubscriptionId { event_type, seq }
    }

    /// Remove a previously registered handler
    ///
    /// Returns `false` if the subscription was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(subscribers) = inner.subscribers.get_mut(&id.event_type) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.seq != id.seq);
        subscribers.len() != before
    }

    /// Deliver an event to every handler subscribed to its type
    ///
    /// The subscriber list is snapshotted before dispatch, so handlers may
    /// subscribe or unsubscribe without deadlocking; such changes take
    /// effect from the next emit.
    pub fn emit(&self, event: &Event) {
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock().unwrap();
            match inner.subscribers.get(&event.event_type) {
                Some(subscribers) => subscribers.iter().map(|s| s.handler.clone()).collect(),
                None => return,
            }
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(
                    event_type = ?event.event_type,
                    event_id = %event.event_id,
                    "event handler panicked; continuing with remaining handlers"
                );
            }
        }
    }

    /// Number of handlers currently subscribed to a type
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .get(&event_type)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ABOUTME: Per-session handler registry mapping event types to subscriber callbacks.
// ABOUTME: Dispatch is synchronous, in registration order, over a snapshot of the handler list.

use crate::event::{AgentEvent, EventType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Subscriber callback
pub type Handler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

#[derive(Default)]
struct Slots {
    next_id: u64,
    handlers: HashMap<EventType, Vec<(u64, Handler)>>,
}

/// Event type to handler mapping owned by exactly one session.
///
/// Deliberately not `Clone`: a registry is never shared between sessions.
#[derive(Default)]
pub struct HandlerRegistry {
    slots: Arc<Mutex<Slots>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type
    pub fn on<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.on_handler(event_type, Arc::new(handler))
    }

    /// Register an already shared handler
    pub fn on_handler(&self, event_type: EventType, handler: Handler) -> Subscription {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.next_id += 1;
        let id = slots.next_id;
        slots
            .handlers
            .entry(event_type)
            .or_default()
            .push((id, handler));

        Subscription {
            slots: Arc::downgrade(&self.slots),
            event_type,
            id,
        }
    }

    /// Dispatch an event to every handler registered for its type.
    ///
    /// The handler list is snapshotted before the first call, so handlers may
    /// subscribe or unsubscribe from inside a dispatch; the change applies
    /// from the next emit on. Returns the number of handlers invoked.
    pub fn emit(&self, event: &AgentEvent) -> usize {
        let snapshot: Vec<Handler> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.handlers.get(&event.event_type()) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return 0,
            }
        };

        for handler in &snapshot {
            handler(event);
        }
        snapshot.len()
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.handlers.get(&event_type).map_or(0, |l| l.len())
    }

    /// Drop every handler (session teardown)
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.handlers.clear();
    }
}

/// Returned by [`HandlerRegistry::on`]. Dropping it keeps the handler
/// registered; call [`Subscription::unsubscribe`] to remove it.
#[must_use = "dropping a Subscription leaves the handler registered"]
#[derive(Debug)]
pub struct Subscription {
    slots: Weak<Mutex<Slots>>,
    event_type: EventType,
    id: u64,
}

impl Subscription {
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Remove the handler. No emit that starts after this returns will call
    /// it; a dispatch already in progress finishes its snapshot.
    pub fn unsubscribe(self) {
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = slots.handlers.get_mut(&self.event_type) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

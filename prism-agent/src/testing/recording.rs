// ABOUTME: Captures every event a session dispatches, in order, for assertions.
// ABOUTME: Subscribes one handler per event type and can serialize the capture as a transcript.

use crate::context::SessionContext;
use crate::event::{AgentEvent, EventPayload, EventType};
use crate::handlers::Subscription;
use anyhow::Result;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Records all events dispatched on one session
#[derive(Clone)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<AgentEvent>>>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

impl EventRecorder {
    /// Subscribe to every event type on the given session
    pub fn attach(ctx: &SessionContext) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriptions = EventType::ALL
            .iter()
            .map(|&event_type| {
                let sink = Arc::clone(&events);
                ctx.on(event_type, move |event: &AgentEvent| {
                    sink.lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(event.clone());
                })
            })
            .collect();
        Self {
            events,
            subscriptions: Arc::new(Mutex::new(subscriptions)),
        }
    }

    /// Stop recording; events already captured are kept
    pub fn detach(&self) {
        let subscriptions =
            std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()));
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Event types in dispatch order
    pub fn types(&self) -> Vec<EventType> {
        self.events().iter().map(AgentEvent::event_type).collect()
    }

    pub fn payloads(&self, event_type: EventType) -> Vec<EventPayload> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type() == event_type)
            .map(|e| e.payload)
            .collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Save the captured events as a pretty-printed JSON array
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.events())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ErrorData, TurnCompleteData};

    #[test]
    fn test_records_in_dispatch_order() {
        let ctx = SessionContext::new("s1");
        let recorder = EventRecorder::attach(&ctx);

        ctx.emit(EventPayload::Error(ErrorData {
            message: "boom".to_string(),
            aborted: false,
        }));
        ctx.emit(EventPayload::TurnComplete(TurnCompleteData {
            stop_reason: None,
            messages: 0,
        }));

        assert_eq!(recorder.types(), vec![EventType::Error, EventType::TurnComplete]);
        assert!(recorder.events().iter().all(|e| e.session_id == "s1"));
    }

    #[test]
    fn test_detach_stops_recording() {
        let ctx = SessionContext::new("s1");
        let recorder = EventRecorder::attach(&ctx);
        recorder.detach();

        ctx.emit(EventPayload::TurnComplete(TurnCompleteData {
            stop_reason: None,
            messages: 0,
        }));
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_save_writes_json_array() {
        let ctx = SessionContext::new("s1");
        let recorder = EventRecorder::attach(&ctx);
        ctx.emit(EventPayload::TurnComplete(TurnCompleteData {
            stop_reason: Some("end_turn".to_string()),
            messages: 2,
        }));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        recorder.save(&path).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved[0]["type"], "turn.complete");
        assert_eq!(saved[0]["sessionId"], "s1");
        assert_eq!(saved[0]["data"]["stopReason"], "end_turn");
    }
}

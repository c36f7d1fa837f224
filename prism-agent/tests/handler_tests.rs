// ABOUTME: Tests for the per-session handler registry.
// ABOUTME: Covers dispatch order, unsubscribe timing and isolation between sessions.

use prism_agent::event::{ErrorData, EventPayload, TurnCompleteData};
use prism_agent::{AgentEvent, EventType, HandlerRegistry, SessionContext, Subscription};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn turn_complete(session: &str) -> AgentEvent {
    AgentEvent::new(
        session,
        EventPayload::TurnComplete(TurnCompleteData {
            stop_reason: None,
            messages: 0,
        }),
    )
}

fn error(session: &str) -> AgentEvent {
    AgentEvent::new(
        session,
        EventPayload::Error(ErrorData {
            message: "boom".to_string(),
            aborted: false,
        }),
    )
}

#[test]
fn test_unsubscribe_between_emits_calls_handler_once() {
    let registry = HandlerRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let subscription = registry.on(EventType::TurnComplete, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    registry.emit(&turn_complete("s1"));
    subscription.unsubscribe();
    registry.emit(&turn_complete("s1"));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(registry.handler_count(EventType::TurnComplete), 0);
}

#[test]
fn test_handlers_run_in_registration_order() {
    let registry = HandlerRegistry::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut subscriptions = Vec::new();
    for name in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        subscriptions.push(registry.on(EventType::Error, move |_| {
            order.lock().unwrap().push(name);
        }));
    }

    assert_eq!(registry.emit(&error("s1")), 3);
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn test_unsubscribe_during_dispatch_applies_from_next_emit() {
    let registry = HandlerRegistry::new();
    let second_calls = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let victim = Arc::clone(&slot);
    let _first = registry.on(EventType::Error, move |_| {
        if let Some(subscription) = victim.lock().unwrap().take() {
            subscription.unsubscribe();
        }
    });
    let counter = Arc::clone(&second_calls);
    let second = registry.on(EventType::Error, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    *slot.lock().unwrap() = Some(second);

    // The current pass still reaches the handler removed mid-dispatch
    assert_eq!(registry.emit(&error("s1")), 2);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);

    assert_eq!(registry.emit(&error("s1")), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_emit_only_reaches_matching_type() {
    let registry = HandlerRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _sub = registry.on(EventType::Text, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(registry.emit(&error("s1")), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_handler_may_subscribe_during_dispatch() {
    let ctx = SessionContext::new("s1");
    let late_calls = Arc::new(AtomicUsize::new(0));

    let inner_ctx = ctx.clone();
    let counter = Arc::clone(&late_calls);
    let added = Arc::new(AtomicUsize::new(0));
    let added_flag = Arc::clone(&added);
    let _sub = ctx.on(EventType::Error, move |_| {
        if added_flag.fetch_add(1, Ordering::SeqCst) == 0 {
            let counter = Arc::clone(&counter);
            let _late = inner_ctx.on(EventType::Error, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    ctx.emit(EventPayload::Error(ErrorData {
        message: "first".to_string(),
        aborted: false,
    }));
    assert_eq!(late_calls.load(Ordering::SeqCst), 0);

    ctx.emit(EventPayload::Error(ErrorData {
        message: "second".to_string(),
        aborted: false,
    }));
    assert_eq!(late_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_sessions_do_not_share_handlers() {
    let first = SessionContext::new("s1");
    let second = SessionContext::new("s2");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let _sub = second.on(EventType::TurnComplete, move |event| {
        sink.lock().unwrap().push(event.session_id.clone());
    });

    first.emit(EventPayload::TurnComplete(TurnCompleteData {
        stop_reason: None,
        messages: 0,
    }));
    assert!(seen.lock().unwrap().is_empty());

    second.emit(EventPayload::TurnComplete(TurnCompleteData {
        stop_reason: None,
        messages: 0,
    }));
    assert_eq!(*seen.lock().unwrap(), vec!["s2".to_string()]);
}

#[test]
fn test_unsubscribe_after_registry_dropped_is_harmless() {
    let registry = HandlerRegistry::new();
    let subscription = registry.on(EventType::Text, |_| {});
    drop(registry);
    subscription.unsubscribe();
}

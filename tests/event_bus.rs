//! Event bus contract: ordering, sink isolation, subscription management.

use std::io;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use taskloom::event_bus::{
    EventBus, EventKind, EventSink, EventStream, MemorySink, WorkflowEvent,
};

fn event(kind: EventKind, step: &str) -> WorkflowEvent {
    WorkflowEvent::new(kind, "wf", "inst", Some(step.to_string()), json!({}))
}

async fn settle() {
    // Sink workers drain asynchronously; give them a beat.
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn subscriber_sees_publication_order() {
    let bus = EventBus::silent();
    let mut stream: EventStream = bus.subscribe();
    let emitter = bus.get_emitter();

    for step in ["a", "b", "c"] {
        emitter.emit(event(EventKind::StepStart, step)).unwrap();
    }

    let mut seen = Vec::new();
    while let Ok(event) = stream.try_recv() {
        seen.push(event.step_id.unwrap());
    }
    assert_eq!(seen, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn memory_sink_captures_events() {
    let bus = EventBus::silent();
    let sink = MemorySink::new();
    bus.add_sink(sink.clone());
    bus.listen_for_events();

    let emitter = bus.get_emitter();
    emitter.emit(event(EventKind::StepStart, "a")).unwrap();
    emitter.emit(event(EventKind::StepComplete, "a")).unwrap();
    settle().await;

    assert_eq!(
        sink.kinds(),
        vec![EventKind::StepStart, EventKind::StepComplete]
    );
    assert_eq!(sink.of_kind(EventKind::StepStart).len(), 1);
}

/// Sink that fails on every event.
struct BrokenSink;

impl EventSink for BrokenSink {
    fn handle(&mut self, _event: &WorkflowEvent) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "sink offline"))
    }
}

#[tokio::test]
async fn failing_sink_does_not_starve_the_others() {
    let bus = EventBus::silent();
    bus.add_sink(BrokenSink);
    let healthy = MemorySink::new();
    bus.add_sink(healthy.clone());
    bus.listen_for_events();

    let emitter = bus.get_emitter();
    for step in ["a", "b", "c"] {
        emitter.emit(event(EventKind::StepStart, step)).unwrap();
    }
    settle().await;

    assert_eq!(healthy.snapshot().len(), 3);
}

#[tokio::test]
async fn removed_sink_stops_receiving() {
    let bus = EventBus::silent();
    let sink = MemorySink::new();
    let id = bus.add_sink(sink.clone());
    bus.listen_for_events();

    let emitter = bus.get_emitter();
    emitter.emit(event(EventKind::StepStart, "a")).unwrap();
    settle().await;
    assert!(bus.remove_sink(id));
    assert!(!bus.remove_sink(id));

    emitter.emit(event(EventKind::StepStart, "b")).unwrap();
    settle().await;

    let captured = sink.snapshot();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].step_id.as_deref(), Some("a"));
}

#[tokio::test]
async fn late_sink_only_sees_later_events() {
    let bus = EventBus::silent();
    bus.listen_for_events();
    let emitter = bus.get_emitter();
    emitter.emit(event(EventKind::StepStart, "early")).unwrap();

    let sink = MemorySink::new();
    bus.add_sink(sink.clone());
    settle().await;
    emitter.emit(event(EventKind::StepStart, "late")).unwrap();
    settle().await;

    let steps: Vec<_> = sink
        .snapshot()
        .iter()
        .map(|e| e.step_id.clone().unwrap())
        .collect();
    assert_eq!(steps, vec!["late"]);
}

#[tokio::test]
async fn closed_hub_rejects_emission() {
    let bus = EventBus::silent();
    let emitter = bus.get_emitter();
    bus.close_channel();
    assert!(emitter.emit(event(EventKind::StepStart, "a")).is_err());
}

#[tokio::test]
async fn async_stream_terminates_on_close() {
    let bus = EventBus::silent();
    let stream = bus.subscribe();
    let emitter = bus.get_emitter();

    emitter.emit(event(EventKind::StepStart, "a")).unwrap();
    emitter.emit(event(EventKind::StepComplete, "a")).unwrap();
    bus.close_channel();

    let collected: Vec<WorkflowEvent> = stream.into_async_stream().collect().await;
    assert_eq!(collected.len(), 2);
}

#[tokio::test]
async fn next_timeout_returns_none_when_idle() {
    let bus = EventBus::silent();
    let mut stream = bus.subscribe();
    let got = stream.next_timeout(Duration::from_millis(20)).await;
    assert!(got.is_none());
}

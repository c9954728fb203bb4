use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::{sync::oneshot, task};

use super::emitter::EventEmitter;
use super::hub::{EventHub, EventHubMetrics, EventStream};
use super::sink::{EventSink, StdOutSink};

const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Handle returned when a sink is attached; pass it back to detach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SinkId(usize);

/// Central event broadcasting system for workflow execution events.
///
/// The bus receives events from engine components and fans them out to
/// subscribers and to attached sinks (stdout, memory, JSONL, channels). Each
/// sink runs on its own worker task with its own hub subscription, so a
/// failing or slow sink never blocks the publisher or its peers, and
/// attaching/detaching a sink never disturbs an in-flight dispatch.
///
/// ```text
/// Engine components
///     │ scope.emit()
///     ▼
/// EventHub (broadcast)
///     ├──────────┬──────────┬─────────┐
///     ▼          ▼          ▼         ▼
/// StdOutSink MemorySink ChannelSink subscribers
/// ```
pub struct EventBus {
    sinks: Arc<Mutex<Vec<SinkEntry>>>,
    hub: Arc<EventHub>,
    started: AtomicBool,
    next_sink_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_capacity(sinks, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(sinks: Vec<Box<dyn EventSink>>, buffer_capacity: usize) -> Self {
        let hub = EventHub::new(buffer_capacity);
        let next_sink_id = AtomicUsize::new(0);
        let entries = sinks
            .into_iter()
            .map(|sink| SinkEntry::new(SinkId(next_sink_id.fetch_add(1, Ordering::SeqCst)), sink))
            .collect();
        Self {
            sinks: Arc::new(Mutex::new(entries)),
            hub,
            started: AtomicBool::new(false),
            next_sink_id,
        }
    }

    /// A bus with no sinks; consumers observe events via [`subscribe`](Self::subscribe).
    pub fn silent() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Attach a sink; if the bus is already listening the sink starts
    /// receiving immediately (events published before attachment are not
    /// replayed).
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) -> SinkId {
        self.add_boxed_sink(Box::new(sink))
    }

    pub fn add_boxed_sink(&self, sink: Box<dyn EventSink>) -> SinkId {
        let id = SinkId(self.next_sink_id.fetch_add(1, Ordering::SeqCst));
        let mut sinks = self.sinks.lock().unwrap();
        let mut entry = SinkEntry::new(id, sink);
        if self.started.load(Ordering::SeqCst) {
            entry.spawn_worker(self.hub.clone());
        }
        sinks.push(entry);
        id
    }

    /// Detach a previously attached sink. Returns `false` for unknown ids.
    pub fn remove_sink(&self, id: SinkId) -> bool {
        let mut sinks = self.sinks.lock().unwrap();
        let Some(pos) = sinks.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let mut entry = sinks.remove(pos);
        entry.abort_worker();
        true
    }

    pub fn get_emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(self.hub.emitter())
    }

    pub fn subscribe(&self) -> EventStream {
        self.hub.subscribe()
    }

    pub fn metrics(&self) -> EventHubMetrics {
        self.hub.metrics()
    }

    /// Start the sink workers. Idempotent.
    pub fn listen_for_events(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sinks = self.sinks.lock().unwrap();
        for entry in sinks.iter_mut() {
            entry.spawn_worker(self.hub.clone());
        }
    }

    /// Stop the sink workers, waiting for each to drain.
    pub async fn stop_listener(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut sinks = self.sinks.lock().unwrap();
        for entry in sinks.iter_mut() {
            entry.stop_worker().await;
        }
    }

    /// Close the hub so subscribers observe end-of-stream.
    pub fn close_channel(&self) {
        self.hub.close();
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if self.started.load(Ordering::SeqCst) {
            if let Ok(mut sinks) = self.sinks.lock() {
                for entry in sinks.iter_mut() {
                    entry.abort_worker();
                }
            }
        }
    }
}

struct SinkEntry {
    id: SinkId,
    sink: Arc<Mutex<Box<dyn EventSink>>>,
    worker: Option<SinkWorker>,
}

impl SinkEntry {
    fn new(id: SinkId, sink: Box<dyn EventSink>) -> Self {
        Self {
            id,
            sink: Arc::new(Mutex::new(sink)),
            worker: None,
        }
    }

    fn spawn_worker(&mut self, hub: Arc<EventHub>) {
        if self.worker.is_some() {
            return;
        }
        let sink = Arc::clone(&self.sink);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut stream = hub.subscribe();
        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = stream.recv() => match event {
                        Ok(event) => {
                            if let Ok(mut guard) = sink.lock() {
                                if let Err(err) = guard.handle(&event) {
                                    tracing::warn!(
                                        sink = %guard.name(),
                                        error = %err,
                                        "event sink error"
                                    );
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        });
        self.worker = Some(SinkWorker {
            shutdown: shutdown_tx,
            handle,
        });
    }

    async fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            let _ = worker.handle.await;
        }
    }

    fn abort_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            worker.handle.abort();
        }
    }
}

struct SinkWorker {
    shutdown: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

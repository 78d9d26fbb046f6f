use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::{sync::oneshot, task};

use super::diagnostics::{DiagnosticsStream, SinkDiagnostic};
use super::emitter::EventEmitter;
use super::hub::{EventHub, EventStream};
use super::sink::{EventSink, StdOutSink};

/// Central event broadcasting system for mission execution events.
///
/// `EventBus` receives events emitted by the executor and step handlers and
/// broadcasts them to every registered sink (stdout, a channel for SSE,
/// in-memory capture for tests, ...). It is owned by `MissionRunner`, not
/// `Mission` itself, so the same compiled mission can be invoked by several
/// runners with independent event configurations (e.g. per-request isolation
/// in a web server embedding this crate).
///
/// ```rust,no_run
/// use reqon::event_bus::{EventBus, ChannelSink, StdOutSink};
///
/// let (tx, _rx) = flume::unbounded();
/// let bus = EventBus::with_sinks(vec![
///     Box::new(StdOutSink::default()),
///     Box::new(ChannelSink::new(tx)),
/// ]);
/// bus.listen_for_events();
/// ```
const DEFAULT_BUFFER_CAPACITY: usize = 1024;
const DIAGNOSTICS_BUFFER_CAPACITY: usize = 256;

pub struct EventBus {
    sinks: Arc<Mutex<Vec<SinkEntry>>>,
    hub: Arc<EventHub>,
    started: AtomicBool,
    diagnostics: broadcast::Sender<SinkDiagnostic>,
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

    pub(crate) fn with_capacity(sinks: Vec<Box<dyn EventSink>>, buffer_capacity: usize) -> Self {
        let hub = EventHub::new(buffer_capacity);
        let entries = sinks.into_iter().map(SinkEntry::new).collect();
        let (diagnostics, _) = broadcast::channel(DIAGNOSTICS_BUFFER_CAPACITY);
        Self {
            sinks: Arc::new(Mutex::new(entries)),
            hub,
            started: AtomicBool::new(false),
            diagnostics,
        }
    }

    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.add_boxed_sink(Box::new(sink));
    }

    pub fn add_boxed_sink(&self, sink: Box<dyn EventSink>) {
        let mut sinks = self.sinks.lock().unwrap();
        let mut entry = SinkEntry::new(sink);
        if self.started.load(Ordering::SeqCst) {
            entry.spawn_worker(self.hub.clone(), self.diagnostics.clone());
        }
        sinks.push(entry);
    }

    pub fn get_emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(self.hub.emitter())
    }

    pub fn subscribe(&self) -> EventStream {
        self.hub.subscribe()
    }

    /// Subscribes to sink failures: a sink's `handle` returning `Err` never
    /// stops the bus, but it is also not silent beyond a stderr line — this
    /// stream is how a caller (a web server embedding this crate, a health
    /// check) can observe and alert on it.
    pub fn subscribe_diagnostics(&self) -> DiagnosticsStream {
        DiagnosticsStream::new(self.diagnostics.subscribe())
    }

    pub fn listen_for_events(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sinks = self.sinks.lock().unwrap();
        for entry in sinks.iter_mut() {
            entry.spawn_worker(self.hub.clone(), self.diagnostics.clone());
        }
    }

    pub async fn stop_listener(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut sinks = self.sinks.lock().unwrap();
        for entry in sinks.iter_mut() {
            entry.stop_worker().await;
        }
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
    name: String,
    sink: Arc<Mutex<Box<dyn EventSink>>>,
    occurrences: Arc<AtomicU64>,
    worker: Option<SinkWorker>,
}

impl SinkEntry {
    fn new(sink: Box<dyn EventSink>) -> Self {
        let name = sink.name();
        Self {
            name,
            sink: Arc::new(Mutex::new(sink)),
            occurrences: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    fn spawn_worker(&mut self, hub: Arc<EventHub>, diagnostics: broadcast::Sender<SinkDiagnostic>) {
        if self.worker.is_some() {
            return;
        }
        let sink = Arc::clone(&self.sink);
        let name = self.name.clone();
        let occurrences = Arc::clone(&self.occurrences);
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
                                    eprintln!("EventBus sink error: {err}");
                                    let occurrence = occurrences.fetch_add(1, Ordering::Relaxed) + 1;
                                    // No receivers is the common case (nobody
                                    // subscribed to diagnostics); dropping the
                                    // send result is deliberate, not ignored.
                                    let _ = diagnostics.send(SinkDiagnostic {
                                        sink: name.clone(),
                                        error: err.to_string(),
                                        when: Utc::now(),
                                        occurrence,
                                    });
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

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::event::{Event, MissionEvent, MissionEventKind};
    use std::io;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn handle(&mut self, _event: &Event) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn name(&self) -> String {
            "FailingSink".to_string()
        }
    }

    fn mission_event() -> Event {
        Event::Mission(MissionEvent {
            kind: MissionEventKind::Start,
            mission: "demo".to_string(),
            run_id: "run-1".to_string(),
            message: None,
            when: Utc::now(),
        })
    }

    #[tokio::test]
    async fn a_failing_sink_publishes_a_diagnostic() {
        let bus = EventBus::with_sink(FailingSink);
        let mut diagnostics = bus.subscribe_diagnostics();
        bus.listen_for_events();

        let emitter = bus.get_emitter();
        emitter.emit(mission_event()).unwrap();

        let diag = diagnostics
            .next_timeout(std::time::Duration::from_secs(1))
            .await
            .expect("the failing sink's error reaches the diagnostics stream");
        assert_eq!(diag.sink, "FailingSink");
        assert_eq!(diag.occurrence, 1);
        assert!(diag.error.contains("disk full"));
    }
}

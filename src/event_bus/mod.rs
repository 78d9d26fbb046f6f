//! Event bus utilities providing fan-out, sinks, and subscriber APIs.
//!
//! Organized around a broadcast-based [`EventHub`] and helpers for
//! configuring sinks ([`EventBus`]) and consuming the resulting
//! [`EventStream`]. [`Event`] and its per-family payload structs are the
//! wire format described in spec §6's event bus contract.

pub mod bus;
pub mod diagnostics;
pub mod emitter;
pub mod event;
pub mod hub;
pub mod sink;

pub use bus::EventBus;
pub use diagnostics::{DiagnosticsStream, SinkDiagnostic};
pub use emitter::{EmitterError, EventEmitter};
pub use event::{
    DataEvent, DataEventKind, Event, FetchEvent, FetchEventKind, LoopEvent, LoopEventKind,
    MissionEvent, MissionEventKind, ResilienceEvent, ResilienceEventKind, StageEvent,
    StageEventKind, StepEvent, StepEventKind, WebhookEvent, WebhookEventKind,
};
pub use hub::{BlockingEventIter, EventHub, EventHubMetrics, EventStream, HubEmitter};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, StdOutSink};

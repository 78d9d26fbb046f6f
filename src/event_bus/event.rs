use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured event emitted during mission execution.
///
/// Event families follow the external interface contract: `mission.*`,
/// `stage.*`, `step.*`, `fetch.*`, `loop.*`, `data.*`, `webhook.*`, and the
/// resilience events (`rate.*`, `circuit.*`). Subscribers must tolerate
/// unknown future fields, so every variant carries a `details` bag in
/// addition to its named fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Event {
    Mission(MissionEvent),
    Stage(StageEvent),
    Step(StepEvent),
    Fetch(FetchEvent),
    Loop(LoopEvent),
    Data(DataEvent),
    Webhook(WebhookEvent),
    Resilience(ResilienceEvent),
}

impl Event {
    pub fn scope_label(&self) -> &str {
        match self {
            Event::Mission(e) => e.kind.as_tag(),
            Event::Stage(e) => e.kind.as_tag(),
            Event::Step(e) => e.kind.as_tag(),
            Event::Fetch(e) => e.kind.as_tag(),
            Event::Loop(e) => e.kind.as_tag(),
            Event::Data(e) => e.kind.as_tag(),
            Event::Webhook(e) => e.kind.as_tag(),
            Event::Resilience(e) => e.kind.as_tag(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Event::Mission(e) => e.message.clone().unwrap_or_else(|| e.mission.clone()),
            Event::Stage(e) => e.message.clone().unwrap_or_else(|| format!("stage {}", e.stage_index)),
            Event::Step(e) => e.message.clone().unwrap_or_else(|| e.step_kind.clone()),
            Event::Fetch(e) => e.message.clone().unwrap_or_else(|| e.source.clone()),
            Event::Loop(e) => e.message.clone().unwrap_or_default(),
            Event::Data(e) => e.message.clone().unwrap_or_default(),
            Event::Webhook(e) => e.message.clone().unwrap_or_else(|| e.path.clone()),
            Event::Resilience(e) => e.message.clone().unwrap_or_default(),
        }
    }

    /// Normalize to `{ "type": "...", "scope": "...", "message": "...", "timestamp": "...", "details": {...} }`.
    pub fn to_json_value(&self) -> Value {
        let details = serde_json::to_value(self).unwrap_or(Value::Null);
        serde_json::json!({
            "type": self.scope_label(),
            "scope": self.scope_label(),
            "message": self.message(),
            "timestamp": self.timestamp().to_rfc3339(),
            "details": details,
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_json_value())
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Mission(e) => e.when,
            Event::Stage(e) => e.when,
            Event::Step(e) => e.when,
            Event::Fetch(e) => e.when,
            Event::Loop(e) => e.when,
            Event::Data(e) => e.when,
            Event::Webhook(e) => e.when,
            Event::Resilience(e) => e.when,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scope_label(), self.message())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MissionEventKind {
    Start,
    Complete,
    Failed,
}

impl MissionEventKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            MissionEventKind::Start => "mission.start",
            MissionEventKind::Complete => "mission.complete",
            MissionEventKind::Failed => "mission.failed",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MissionEvent {
    pub kind: MissionEventKind,
    pub mission: String,
    pub run_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub when: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StageEventKind {
    Start,
    Complete,
}

impl StageEventKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            StageEventKind::Start => "stage.start",
            StageEventKind::Complete => "stage.complete",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageEvent {
    pub kind: StageEventKind,
    pub stage_index: usize,
    pub actions: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub when: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepEventKind {
    Start,
    Complete,
    Error,
}

impl StepEventKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            StepEventKind::Start => "step.start",
            StepEventKind::Complete => "step.complete",
            StepEventKind::Error => "step.error",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepEvent {
    pub kind: StepEventKind,
    pub action: String,
    pub step_index: usize,
    pub step_kind: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub when: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FetchEventKind {
    Start,
    Complete,
    Retry,
    Error,
}

impl FetchEventKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            FetchEventKind::Start => "fetch.start",
            FetchEventKind::Complete => "fetch.complete",
            FetchEventKind::Retry => "fetch.retry",
            FetchEventKind::Error => "fetch.error",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FetchEvent {
    pub kind: FetchEventKind,
    pub source: String,
    pub attempt: u32,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub when: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoopEventKind {
    Start,
    Iteration,
    Complete,
}

impl LoopEventKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            LoopEventKind::Start => "loop.start",
            LoopEventKind::Iteration => "loop.iteration",
            LoopEventKind::Complete => "loop.complete",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoopEvent {
    pub kind: LoopEventKind,
    pub action: String,
    #[serde(default)]
    pub index: Option<usize>,
    pub total: Option<usize>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub when: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataEventKind {
    Transform,
    Validate,
    Store,
}

impl DataEventKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            DataEventKind::Transform => "data.transform",
            DataEventKind::Validate => "data.validate",
            DataEventKind::Store => "data.store",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataEvent {
    pub kind: DataEventKind,
    pub action: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub when: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum WebhookEventKind {
    Register,
    Complete,
}

impl WebhookEventKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            WebhookEventKind::Register => "webhook.register",
            WebhookEventKind::Complete => "webhook.complete",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub path: String,
    #[serde(default)]
    pub received: usize,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub when: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResilienceEventKind {
    RateLimited,
    RateWaiting,
    RateResumed,
    CircuitOpened,
    CircuitHalfOpen,
    CircuitClosed,
    CircuitRejected,
}

impl ResilienceEventKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ResilienceEventKind::RateLimited => "rate.limited",
            ResilienceEventKind::RateWaiting => "rate.waiting",
            ResilienceEventKind::RateResumed => "rate.resumed",
            ResilienceEventKind::CircuitOpened => "circuit.opened",
            ResilienceEventKind::CircuitHalfOpen => "circuit.half_open",
            ResilienceEventKind::CircuitClosed => "circuit.closed",
            ResilienceEventKind::CircuitRejected => "circuit.rejected",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResilienceEvent {
    pub kind: ResilienceEventKind,
    pub source: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub when: DateTime<Utc>,
}

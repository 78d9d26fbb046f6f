//! Step handlers: one executor function per [`Step`](crate::program::Step)
//! variant, dispatched by [`run_steps`] (spec §4.5).
//!
//! Each handler takes the same trio — the step's own AST node, the mutable
//! [`ActionContext`] it reads/writes, and a [`StepRuntime`] bundling the
//! shared, read-only mission state — mirroring the teacher's
//! `Node::run(&self, snapshot, ctx)` shape generalized from one node type to
//! nine step kinds.

pub mod apply;
pub mod fetch;
pub mod flow;
pub mod for_loop;
pub mod let_step;
pub mod map;
pub mod match_step;
pub mod schema;
pub mod store;
pub mod validate;
pub mod wait;

pub use flow::FlowSignal;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::event_bus::{
    DataEvent, DataEventKind, Event, FetchEvent, FetchEventKind, LoopEvent, LoopEventKind, StepEvent, StepEventKind,
};
use crate::executor::context::{ActionContext, MissionContext};
use crate::http::client::HttpClientError;
use crate::pagination::PaginationError;
use crate::program::{ExprError, Step};
use crate::stores::StoreError;
use crate::value::ValueError;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Http(#[from] HttpClientError),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("no source named '{0}', and the program declares none or more than one as default")]
    UnknownSource(String),
    #[error("no store named '{0}'")]
    UnknownStore(String),
    #[error("no transform named '{0}'")]
    UnknownTransform(String),
    #[error("no schema named '{0}'")]
    UnknownSchema(String),
    #[error("transform '{transform}' matched no variant for the current input shape")]
    NoTransformMatch { transform: String },
    #[error("match step found no matching arm and declares no wildcard arm")]
    NoSchemaMatch,
    #[error("validation assumption '{name}' failed: {constraint}")]
    ValidationFailed { name: String, constraint: String },
    #[error("collection reference '{0}' did not resolve to a list")]
    InvalidCollection(String),
    #[error("wait step on '{path}' timed out after {timeout_ms}ms")]
    WaitTimeout { path: String, timeout_ms: u64 },
}

#[derive(Debug, Default)]
pub struct StepOutcome {
    pub signal: Option<FlowSignal>,
}

impl StepOutcome {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_signal(signal: FlowSignal) -> Self {
        Self { signal: Some(signal) }
    }
}

/// Read-only, per-action handle to shared mission state plus the
/// cancellation token for the in-flight run. Cheap to construct; handlers
/// borrow it rather than threading five separate parameters.
pub struct StepRuntime<'a> {
    pub mission: &'a MissionContext,
    pub action: &'a str,
    pub cancel: &'a CancellationToken,
}

impl<'a> StepRuntime<'a> {
    #[must_use]
    pub fn new(mission: &'a MissionContext, action: &'a str, cancel: &'a CancellationToken) -> Self {
        Self { mission, action, cancel }
    }

    pub fn emit(&self, event: Event) {
        if let Some(emitter) = &self.mission.emitter {
            let _ = emitter.emit(event);
        }
    }

    fn emit_step(&self, kind: StepEventKind, step_index: usize, step_kind: &'static str, message: Option<String>) {
        self.emit(Event::Step(StepEvent {
            kind,
            action: self.action.to_string(),
            step_index,
            step_kind: step_kind.to_string(),
            message,
            when: chrono::Utc::now(),
        }));
    }

    pub fn emit_loop(&self, kind: LoopEventKind, index: Option<usize>, total: Option<usize>, message: Option<String>) {
        self.emit(Event::Loop(LoopEvent {
            kind,
            action: self.action.to_string(),
            index,
            total,
            message,
            when: chrono::Utc::now(),
        }));
    }

    pub fn emit_data(&self, kind: DataEventKind, message: Option<String>) {
        self.emit(Event::Data(DataEvent { kind, action: self.action.to_string(), message, when: chrono::Utc::now() }));
    }

    pub fn emit_fetch(&self, kind: FetchEventKind, source: &str, attempt: u32, status: Option<u16>, message: Option<String>) {
        self.emit(Event::Fetch(FetchEvent {
            kind,
            source: source.to_string(),
            attempt,
            status,
            message,
            when: chrono::Utc::now(),
        }));
    }
}

/// Runs a step sequence in order, stopping at the first error or the first
/// step that returns a [`FlowSignal`]. `step_offset` lets nested bodies
/// (e.g. a `for` loop's per-iteration steps) report indices relative to
/// their position in the enclosing action rather than always starting at 0.
/// Also checked before every step so a sibling action's abort, which
/// cancels the run's shared token, stops this action promptly instead of
/// running to completion regardless.
pub async fn run_steps(
    steps: &[Step],
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
    step_offset: usize,
) -> Result<Option<FlowSignal>, StepError> {
    for (i, step) in steps.iter().enumerate() {
        if runtime.cancel.is_cancelled() {
            return Ok(Some(FlowSignal::Abort {
                message: Some("mission cancelled by a sibling action's abort".to_string()),
            }));
        }

        let step_index = step_offset + i;
        runtime.emit_step(StepEventKind::Start, step_index, step.kind_name(), None);

        let outcome = match execute_step(step, ctx, runtime, step_index).await {
            Ok(outcome) => outcome,
            Err(err) => {
                runtime.emit_step(StepEventKind::Error, step_index, step.kind_name(), Some(err.to_string()));
                return Err(err);
            }
        };

        runtime.emit_step(StepEventKind::Complete, step_index, step.kind_name(), None);
        if let Some(signal) = outcome.signal {
            return Ok(Some(signal));
        }
    }
    Ok(None)
}

async fn execute_step(
    step: &Step,
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
    step_index: usize,
) -> Result<StepOutcome, StepError> {
    match step {
        Step::Fetch(s) => fetch::execute(s, ctx, runtime, step_index).await,
        Step::For(s) => for_loop::execute(s, ctx, runtime, step_index).await,
        Step::Map(s) => map::execute(s, ctx, runtime),
        Step::Apply(s) => apply::execute(s, ctx, runtime),
        Step::Validate(s) => validate::execute(s, ctx, runtime),
        Step::Store(s) => store::execute(s, ctx, runtime).await,
        Step::Match(s) => match_step::execute(s, ctx, runtime, step_index).await,
        Step::Let(s) => let_step::execute(s, ctx, runtime),
        Step::Wait(s) => wait::execute(s, ctx, runtime).await,
    }
}

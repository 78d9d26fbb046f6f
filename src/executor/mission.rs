//! The mission executor (spec §4.6): runs a [`Program`]'s pipeline stage by
//! stage, each stage's actions concurrently bounded by a [`Scheduler`], and
//! folds every action's [`FlowSignal`] into the run's control flow.
//!
//! Grounded on the teacher's `AppRunner::run_to_completion` superstep loop:
//! stages play the role of supersteps, actions the role of a superstep's
//! runnable nodes, and `ExecutionState` the role of the teacher's resumable
//! checkpoint after each superstep.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::channels::errors::{ErrorEvent, LadderError};
use crate::event_bus::{Event, EventEmitter, MissionEvent, MissionEventKind, StageEvent, StageEventKind};
use crate::executor::context::{ActionContext, MissionContext};
use crate::executor::persistence::{ExecutionState, ExecutionStateStore, StageStatus};
use crate::executor::scheduler::Scheduler;
use crate::program::{JumpThen, StageSpec};
use crate::steps::{run_steps, FlowSignal, StepError, StepRuntime};
use crate::utils::id_generator::IdGenerator;

/// How many times a single action's task may hand control to a `jump`
/// target or re-enter itself via `retry` before the run gives up. Bounds
/// the otherwise-unbounded cycles a misconfigured pipeline could produce
/// (spec §9).
const MAX_JUMP_DEPTH: u8 = 8;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Step(#[from] StepError),
    #[error("action aborted: {0}")]
    Abort(String),
    #[error("no action named '{0}'")]
    UnknownAction(String),
    #[error(transparent)]
    Scheduler(#[from] crate::executor::scheduler::SchedulerError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissionStatus {
    Completed,
    Failed,
    Aborted,
}

/// What a run produced: its final status plus every error event collected
/// along the way, regardless of whether that error was fatal (spec §7).
#[derive(Debug)]
pub struct ExecutionResult {
    pub run_id: String,
    pub mission: String,
    pub status: MissionStatus,
    pub errors: Vec<ErrorEvent>,
}

impl ExecutionResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, MissionStatus::Completed)
    }
}

/// Drives one run of a [`MissionContext`]'s pipeline to completion (or
/// abort). Built by [`crate::executor::setup::setup`], which resolves
/// credentials, opens sources and stores, and decides whether this run
/// resumes a prior [`ExecutionState`] before handing one to [`Self::run`].
pub struct MissionRunner {
    context: Arc<MissionContext>,
    execution_states: Arc<dyn ExecutionStateStore>,
    scheduler: Scheduler,
    cancel: CancellationToken,
}

impl MissionRunner {
    #[must_use]
    pub fn new(
        context: Arc<MissionContext>,
        execution_states: Arc<dyn ExecutionStateStore>,
        cancel: CancellationToken,
        concurrency_limit: usize,
    ) -> Self {
        Self { context, execution_states, scheduler: Scheduler::new(concurrency_limit), cancel }
    }

    fn emit(&self, event: Event) {
        if let Some(emitter) = &self.context.emitter {
            let _ = emitter.emit(event);
        }
    }

    #[instrument(skip(self, state), fields(mission = %self.context.program.name, run_id = %self.context.run_id))]
    pub async fn run(&self, mut state: ExecutionState) -> ExecutionResult {
        self.emit(Event::Mission(MissionEvent {
            kind: MissionEventKind::Start,
            mission: self.context.program.name.clone(),
            run_id: self.context.run_id.clone(),
            message: None,
            when: chrono::Utc::now(),
        }));

        let mut errors = Vec::new();
        let mut status = MissionStatus::Completed;

        'stages: for (stage_index, stage) in self.context.program.pipeline.stages.iter().enumerate().skip(state.current_stage) {
            if self.cancel.is_cancelled() {
                status = MissionStatus::Aborted;
                break;
            }

            if let Some(guard) = &stage.guard {
                let probe = ActionContext::root("<stage-guard>");
                match self.context.evaluator.evaluate(guard, &probe, None) {
                    Ok(value) if !value.is_truthy() => {
                        state.stages[stage_index].status = StageStatus::Complete;
                        continue 'stages;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        errors.push(ErrorEvent::stage(stage_index, LadderError::msg(err.to_string())));
                        state.stages[stage_index].status = StageStatus::Failed;
                        status = MissionStatus::Failed;
                        break 'stages;
                    }
                }
            }

            self.emit(Event::Stage(StageEvent {
                kind: StageEventKind::Start,
                stage_index,
                actions: stage.actions.clone(),
                message: None,
                when: chrono::Utc::now(),
            }));
            state.stages[stage_index].status = StageStatus::Running;

            let report = self.run_stage(stage).await;
            state.stages[stage_index].actions_completed = report.ran;

            if report.errors.is_empty() {
                state.stages[stage_index].status = StageStatus::Complete;
            } else {
                state.stages[stage_index].status = StageStatus::Failed;
                for (action, err) in report.errors {
                    if matches!(err, ActionError::Abort(_)) {
                        status = MissionStatus::Aborted;
                    }
                    errors.push(ErrorEvent::action(action, LadderError::msg(err.to_string())));
                }
                if matches!(status, MissionStatus::Completed) {
                    status = MissionStatus::Failed;
                }
            }

            self.emit(Event::Stage(StageEvent {
                kind: StageEventKind::Complete,
                stage_index,
                actions: stage.actions.clone(),
                message: None,
                when: chrono::Utc::now(),
            }));

            state.current_stage = stage_index + 1;
            self.execution_states.save(&state).await;

            if !matches!(status, MissionStatus::Completed) {
                break 'stages;
            }
        }

        self.teardown().await;

        self.emit(Event::Mission(MissionEvent {
            kind: if matches!(status, MissionStatus::Completed) { MissionEventKind::Complete } else { MissionEventKind::Failed },
            mission: self.context.program.name.clone(),
            run_id: self.context.run_id.clone(),
            message: None,
            when: chrono::Utc::now(),
        }));

        ExecutionResult { run_id: self.context.run_id.clone(), mission: self.context.program.name.clone(), status, errors }
    }

    async fn run_stage(&self, stage: &StageSpec) -> crate::executor::scheduler::StageReport<ActionError> {
        let mut tasks = Vec::with_capacity(stage.actions.len());
        for action_name in &stage.actions {
            let context = Arc::clone(&self.context);
            let cancel = self.cancel.clone();
            let name = action_name.clone();
            tasks.push((name.clone(), async move { run_action_with_jumps(context, cancel, name).await }));
        }
        self.scheduler.run_stage(tasks).await
    }

    async fn teardown(&self) {
        for (name, store) in &self.context.stores {
            if let Err(err) = store.close().await {
                tracing::warn!(store = %name, error = %err, "store failed to close cleanly during mission teardown");
            }
        }
    }
}

/// Runs a single action's steps, following `jump`/`retry` flow signals
/// within the same task (spec §9 Open Question: a jump outside the current
/// stage runs sequentially in the calling action's task rather than
/// spawning a new one) up to [`MAX_JUMP_DEPTH`].
fn run_action_with_jumps(
    context: Arc<MissionContext>,
    cancel: CancellationToken,
    action_name: String,
) -> futures_util::future::BoxFuture<'static, Result<(), ActionError>> {
    Box::pin(run_action_bounded(context, cancel, action_name, 0))
}

async fn run_action_bounded(
    context: Arc<MissionContext>,
    cancel: CancellationToken,
    action_name: String,
    depth: u8,
) -> Result<(), ActionError> {
    if depth > MAX_JUMP_DEPTH {
        let message = format!("jump/retry depth exceeded {MAX_JUMP_DEPTH} at action '{action_name}'");
        cancel.cancel();
        return Err(ActionError::Abort(message));
    }

    let action_def = context
        .program
        .actions
        .get(&action_name)
        .cloned()
        .ok_or_else(|| ActionError::UnknownAction(action_name.clone()))?;

    let mut ctx = ActionContext::root(action_name.clone());
    let runtime = StepRuntime::new(&context, &action_name, &cancel);
    let signal = run_steps(&action_def.steps, &mut ctx, &runtime, 0).await?;

    match signal {
        None | Some(FlowSignal::Skip) => Ok(()),
        Some(FlowSignal::Abort { message }) => {
            // Abort ends the whole mission run, not just this action: cancel
            // the shared token so sibling actions in this stage notice too
            // (run_steps checks it before every step; HttpClient checks it
            // mid-request).
            cancel.cancel();
            Err(ActionError::Abort(message.unwrap_or_else(|| format!("action '{action_name}' aborted"))))
        }
        Some(FlowSignal::Retry { .. }) => {
            Box::pin(run_action_bounded(context, cancel, action_name, depth + 1)).await
        }
        Some(FlowSignal::Queue { value, target }) => {
            let dlq_name = target.unwrap_or_else(|| format!("{action_name}_dlq"));
            if let Some(store) = context.store(&dlq_name) {
                let key = IdGenerator::new().generate_session_id();
                store.set(&key, value).await.map_err(StepError::from)?;
            } else {
                tracing::warn!(store = %dlq_name, action = %action_name, "queue target store not declared, dropping value");
            }
            Ok(())
        }
        Some(FlowSignal::Jump { target, then }) => match then {
            JumpThen::Continue => Box::pin(run_action_bounded(context, cancel, target, depth + 1)).await,
            JumpThen::Retry => {
                Box::pin(run_action_bounded(Arc::clone(&context), cancel.clone(), target, depth + 1)).await?;
                Box::pin(run_action_bounded(context, cancel, action_name, depth + 1)).await
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::context::Credentials;
    use crate::pagination::ArrayFieldCache;
    use crate::executor::persistence::NullSyncCheckpointStore;
    use crate::program::{ExprError, ExpressionEvaluator, Pipeline, Program};
    use crate::value::Value;
    use crate::webhook::ChannelWebhookSource;
    use rustc_hash::FxHashMap;

    struct NoopEvaluator;
    impl ExpressionEvaluator for NoopEvaluator {
        fn evaluate(&self, _expr: &crate::program::Expr, _ctx: &ActionContext, _current: Option<&Value>) -> Result<Value, ExprError> {
            Ok(Value::Bool(true))
        }
    }

    fn empty_program() -> Program {
        Program {
            name: "demo".to_string(),
            sources: FxHashMap::default(),
            stores: FxHashMap::default(),
            schemas: FxHashMap::default(),
            transforms: FxHashMap::default(),
            actions: FxHashMap::default(),
            pipeline: Pipeline { stages: Vec::new() },
        }
    }

    #[tokio::test]
    async fn empty_pipeline_completes_cleanly() {
        let context = Arc::new(MissionContext {
            run_id: "run-1".to_string(),
            program: Arc::new(empty_program()),
            stores: FxHashMap::default(),
            http_clients: FxHashMap::default(),
            credentials: Credentials::default(),
            evaluator: Arc::new(NoopEvaluator),
            emitter: None,
            pagination_cache: Arc::new(ArrayFieldCache::new()),
            checkpoints: Arc::new(NullSyncCheckpointStore),
            webhooks: Arc::new(ChannelWebhookSource::new()),
        });
        let runner = MissionRunner::new(context, Arc::new(crate::executor::persistence::NullExecutionStateStore), CancellationToken::new(), 4);
        let state = ExecutionState::new("demo", "run-1", &[]);
        let result = runner.run(state).await;
        assert!(result.is_success());
        assert!(result.errors.is_empty());
    }
}

//! `wait` step: blocks the current action on inbound webhook deliveries for
//! `path` until `expected_count` pass `filter` or the timeout (optionally
//! retried per `retry_on_timeout`) is exhausted (spec §4.5). `timeout_ms`
//! bounds one attempt as a whole, not the gap between individual events;
//! an attempt that collects at least one event before its deadline is a
//! partial success, not a timeout — only an empty attempt counts against
//! `retry_on_timeout` and can ultimately fail the step.

use std::time::Duration;

use tokio::time::Instant;

use crate::event_bus::{Event, WebhookEvent, WebhookEventKind};
use crate::executor::context::ActionContext;
use crate::http::backoff::compute_delay;
use crate::value::Value;

use super::{StepError, StepOutcome, StepRuntime};

pub async fn execute(
    step: &crate::program::WaitStep,
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
) -> Result<StepOutcome, StepError> {
    let expected = step.expected_count as usize;
    let max_attempts = step.retry_on_timeout.as_ref().map_or(1, |r| r.max_attempts).max(1);
    let timeout = Duration::from_millis(step.timeout_ms);
    let mut collected: Vec<Value> = Vec::with_capacity(expected);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let attempt_deadline = Instant::now() + timeout;
        while collected.len() < expected {
            let now = Instant::now();
            if now >= attempt_deadline {
                break;
            }
            let remaining = attempt_deadline - now;
            let Some(value) = runtime.mission.webhooks.recv(&step.path, remaining).await else {
                break;
            };
            let passes = match &step.filter {
                Some(expr) => runtime.mission.evaluator.evaluate(expr, ctx, Some(&value))?.is_truthy(),
                None => true,
            };
            if passes {
                collected.push(value);
            }
        }

        if !collected.is_empty() {
            // Full or partial success: the step does not treat fewer than
            // `expected_count` events as a timeout once at least one has
            // arrived.
            break;
        }
        if attempt >= max_attempts {
            return Err(StepError::WaitTimeout { path: step.path.clone(), timeout_ms: step.timeout_ms });
        }
        if let Some(retry) = &step.retry_on_timeout {
            tokio::time::sleep(compute_delay(retry, attempt)).await;
        }
    }

    if let Some(store_name) = &step.stream_to {
        let store = runtime.mission.store(store_name).ok_or_else(|| StepError::UnknownStore(store_name.clone()))?;
        for item in &collected {
            let key = match &step.stream_key {
                Some(expr) => runtime.mission.evaluator.evaluate(expr, ctx, Some(item))?.to_string(),
                None => item.get_field("id").cloned().unwrap_or(Value::Null).to_string(),
            };
            store.set(&key, item.clone()).await?;
        }
    }

    let received = collected.len();
    let response = if received == 1 { collected.into_iter().next().expect("len checked") } else { Value::List(collected) };
    ctx.set_response(response);

    runtime.emit(Event::Webhook(WebhookEvent {
        kind: WebhookEventKind::Complete,
        path: step.path.clone(),
        received,
        message: None,
        when: chrono::Utc::now(),
    }));
    Ok(StepOutcome::none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rustc_hash::FxHashMap;
    use tokio_util::sync::CancellationToken;

    use crate::executor::context::{Credentials, MissionContext};
    use crate::executor::persistence::NullSyncCheckpointStore;
    use crate::pagination::ArrayFieldCache;
    use crate::program::{Expr, ExprError, ExpressionEvaluator, Pipeline, Program, WaitStep};
    use crate::webhook::ChannelWebhookSource;

    struct NoopEvaluator;
    impl ExpressionEvaluator for NoopEvaluator {
        fn evaluate(&self, _expr: &Expr, _ctx: &ActionContext, _current: Option<&Value>) -> Result<Value, ExprError> {
            Ok(Value::Bool(true))
        }
    }

    fn context(webhooks: Arc<ChannelWebhookSource>) -> MissionContext {
        MissionContext {
            run_id: "run-1".to_string(),
            program: Arc::new(Program {
                name: "demo".to_string(),
                sources: FxHashMap::default(),
                stores: FxHashMap::default(),
                schemas: FxHashMap::default(),
                transforms: FxHashMap::default(),
                actions: FxHashMap::default(),
                pipeline: Pipeline { stages: Vec::new() },
            }),
            stores: FxHashMap::default(),
            http_clients: FxHashMap::default(),
            credentials: Credentials::default(),
            evaluator: Arc::new(NoopEvaluator),
            emitter: None,
            pagination_cache: Arc::new(ArrayFieldCache::new()),
            checkpoints: Arc::new(NullSyncCheckpointStore),
            webhooks,
        }
    }

    fn wait_step(timeout_ms: u64, expected_count: u32) -> WaitStep {
        WaitStep {
            path: "/hooks/demo".to_string(),
            timeout_ms,
            expected_count,
            filter: None,
            stream_to: None,
            stream_key: None,
            retry_on_timeout: None,
        }
    }

    #[tokio::test]
    async fn zero_events_before_timeout_is_an_error() {
        let webhooks = Arc::new(ChannelWebhookSource::new());
        let mission = context(webhooks);
        let cancel = CancellationToken::new();
        let runtime = StepRuntime::new(&mission, "Action", &cancel);
        let mut ctx = ActionContext::root("Action");

        let err = execute(&wait_step(20, 1), &mut ctx, &runtime).await.expect_err("nothing was ever submitted");
        assert!(matches!(err, StepError::WaitTimeout { .. }));
    }

    #[tokio::test]
    async fn a_partial_collection_before_timeout_succeeds() {
        let webhooks = Arc::new(ChannelWebhookSource::new());
        let mission = context(webhooks.clone());
        let cancel = CancellationToken::new();
        let runtime = StepRuntime::new(&mission, "Action", &cancel);
        let mut ctx = ActionContext::root("Action");

        webhooks.submit("/hooks/demo", Value::Int(1)).await;

        let outcome = execute(&wait_step(50, 3), &mut ctx, &runtime).await.expect("one of three is still a success");
        assert!(outcome.signal.is_none());
        assert_eq!(ctx.response(), Some(&Value::Int(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn the_deadline_bounds_the_whole_attempt_not_each_event() {
        let webhooks = Arc::new(ChannelWebhookSource::new());
        let mission = context(webhooks.clone());
        let cancel = CancellationToken::new();
        let runtime = StepRuntime::new(&mission, "Action", &cancel);
        let mut ctx = ActionContext::root("Action");

        let sender = webhooks.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            sender.submit("/hooks/demo", Value::Int(1)).await;
            tokio::time::sleep(Duration::from_millis(60)).await;
            sender.submit("/hooks/demo", Value::Int(2)).await;
        });

        // A 100ms window with events at +60ms and +120ms: if each `recv`
        // got a fresh 100ms window (the bug), both would arrive in time.
        // Bounded to one 100ms window total, only the first does.
        let outcome = execute(&wait_step(100, 2), &mut ctx, &runtime).await.expect("one event is a partial success");
        assert!(outcome.signal.is_none());
        assert_eq!(ctx.response(), Some(&Value::Int(1)));
    }
}

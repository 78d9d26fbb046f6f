//! `for` step: iterates a collection (a store's full contents, or an
//! evaluated list expression), running the body once per item in a child
//! scope bound to `var` (spec §4.5). Each iteration's child context is
//! discarded after it runs; only the response it leaves behind carries
//! forward, mirroring the teacher's per-node partial that doesn't leak
//! into sibling scopes. A `Skip` signal from the body only ends that one
//! iteration; every other signal escapes the whole loop.

use std::sync::Arc;

use crate::event_bus::LoopEventKind;
use crate::executor::context::ActionContext;
use crate::program::CollectionRef;
use crate::value::Value;

use super::{run_steps, FlowSignal, StepError, StepOutcome, StepRuntime};

pub async fn execute(
    step: &crate::program::ForStep,
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
    step_index: usize,
) -> Result<StepOutcome, StepError> {
    let items = resolve_collection(&step.collection, ctx, runtime).await?;
    let base = Arc::new(ctx.clone());

    let mut filtered = Vec::with_capacity(items.len());
    for item in items {
        if let Some(guard) = &step.r#where {
            let mut probe = base.child();
            probe.bind(step.var.clone(), item.clone());
            let passes = runtime.mission.evaluator.evaluate(guard, &probe, Some(&item))?.is_truthy();
            if !passes {
                continue;
            }
        }
        filtered.push(item);
    }

    let total = filtered.len();
    runtime.emit_loop(LoopEventKind::Start, Some(0), Some(total), None);

    for (index, item) in filtered.into_iter().enumerate() {
        runtime.emit_loop(LoopEventKind::Iteration, Some(index), Some(total), None);
        let mut child = base.child();
        child.bind(step.var.clone(), item);

        match run_steps(&step.body, &mut child, runtime, step_index + 1).await? {
            // A skip escapes only the current iteration; the loop moves on.
            Some(FlowSignal::Skip) => continue,
            Some(signal) => return Ok(StepOutcome::with_signal(signal)),
            None => {
                if let Some(response) = child.response() {
                    ctx.set_response(response.clone());
                }
            }
        }
    }

    runtime.emit_loop(LoopEventKind::Complete, None, Some(total), None);
    Ok(StepOutcome::none())
}

async fn resolve_collection(
    collection: &CollectionRef,
    ctx: &ActionContext,
    runtime: &StepRuntime<'_>,
) -> Result<Vec<Value>, StepError> {
    match collection {
        CollectionRef::Store { name } => {
            let store = runtime.mission.store(name).ok_or_else(|| StepError::UnknownStore(name.clone()))?;
            Ok(store.list(None).await?)
        }
        CollectionRef::Value { expr } => {
            let value = runtime.mission.evaluator.evaluate(expr, ctx, ctx.response())?;
            match value {
                Value::List(items) => Ok(items),
                other => Err(StepError::InvalidCollection(other.type_name().to_string())),
            }
        }
    }
}

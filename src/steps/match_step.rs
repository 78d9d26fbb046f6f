//! `match` step: dispatches to the first arm whose schema and guard match
//! the target value, running the arm's body and/or flow directive (spec
//! §4.5). An arm's `body` and `directive` are not exclusive — a body can
//! reshape the response before a directive jumps or queues it.

use crate::executor::context::ActionContext;
use crate::value::Value;

use super::flow::FlowSignal;
use super::schema::schema_matches;
use super::{run_steps, StepError, StepOutcome, StepRuntime};

pub async fn execute(
    step: &crate::program::MatchStep,
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
    step_index: usize,
) -> Result<StepOutcome, StepError> {
    let current = ctx.response().cloned();
    let target = match &step.target {
        Some(expr) => runtime.mission.evaluator.evaluate(expr, ctx, current.as_ref())?,
        None => current.unwrap_or(Value::Null),
    };

    for arm in &step.arms {
        if !schema_matches(runtime.mission, &arm.schema, &target)? {
            continue;
        }
        if let Some(guard) = &arm.guard {
            let passes = runtime.mission.evaluator.evaluate(guard, ctx, Some(&target))?.is_truthy();
            if !passes {
                continue;
            }
        }

        if !arm.body.is_empty() {
            if let Some(signal) = run_steps(&arm.body, ctx, runtime, step_index + 1).await? {
                return Ok(StepOutcome::with_signal(signal));
            }
        }

        if let Some(directive) = &arm.directive {
            if let Some(signal) = FlowSignal::from_directive(directive, ctx.response()) {
                return Ok(StepOutcome::with_signal(signal));
            }
        }
        return Ok(StepOutcome::none());
    }

    Err(StepError::NoSchemaMatch)
}

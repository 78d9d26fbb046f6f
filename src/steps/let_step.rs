//! `let` step: binds one variable in the current action scope (spec §4.5).

use crate::executor::context::ActionContext;

use super::{StepError, StepOutcome, StepRuntime};

pub fn execute(
    step: &crate::program::LetStep,
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
) -> Result<StepOutcome, StepError> {
    let current = ctx.response().cloned();
    let value = runtime.mission.evaluator.evaluate(&step.expr, ctx, current.as_ref())?;
    ctx.bind(step.name.clone(), value);
    Ok(StepOutcome::none())
}

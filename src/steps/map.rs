//! `map` step: reshapes the current response into a new object by
//! evaluating one expression per output field (spec §4.5).

use crate::executor::context::ActionContext;
use crate::utils::collections::ValueMap;
use crate::value::Value;

use super::{StepError, StepOutcome, StepRuntime};

pub fn execute(step: &crate::program::MapStep, ctx: &mut ActionContext, runtime: &StepRuntime<'_>) -> Result<StepOutcome, StepError> {
    let mut fields = ValueMap::default();
    for (name, expr) in &step.fields {
        let value = runtime.mission.evaluator.evaluate(expr, ctx, ctx.response())?;
        fields.insert(name.clone(), value);
    }
    ctx.set_response(Value::Object(fields));
    Ok(StepOutcome::none())
}

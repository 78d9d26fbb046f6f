//! `apply` step: runs the current response through a named transform,
//! taking the first variant whose source schema and guard both match
//! (spec §4.5).

use crate::event_bus::DataEventKind;
use crate::executor::context::ActionContext;
use crate::utils::collections::ValueMap;
use crate::value::Value;

use super::schema::schema_matches;
use super::{StepError, StepOutcome, StepRuntime};

pub fn execute(
    step: &crate::program::ApplyStep,
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
) -> Result<StepOutcome, StepError> {
    let transform = runtime
        .mission
        .transform_def(&step.transform)
        .ok_or_else(|| StepError::UnknownTransform(step.transform.clone()))?;
    let current = ctx.response().cloned().unwrap_or(Value::Null);

    for variant in &transform.variants {
        if let Some(schema_name) = &variant.source_schema {
            if !schema_matches(runtime.mission, schema_name, &current)? {
                continue;
            }
        }
        if let Some(guard) = &variant.guard {
            let passes = runtime.mission.evaluator.evaluate(guard, ctx, Some(&current))?.is_truthy();
            if !passes {
                continue;
            }
        }

        let mut fields = ValueMap::default();
        for (name, expr) in &variant.mappings {
            let value = runtime.mission.evaluator.evaluate(expr, ctx, Some(&current))?;
            fields.insert(name.clone(), value);
        }
        let result = Value::Object(fields);
        match &step.bind {
            Some(name) => ctx.bind(name.clone(), result),
            None => ctx.set_response(result),
        }
        runtime.emit_data(DataEventKind::Transform, Some(format!("applied transform '{}'", step.transform)));
        return Ok(StepOutcome::none());
    }

    Err(StepError::NoTransformMatch { transform: step.transform.clone() })
}

//! `validate` step: checks a list of assumptions against the current
//! response. An `Error`-severity failure aborts the step with
//! [`StepError::ValidationFailed`]; a `Warning`-severity failure is logged
//! to the event bus and the remaining assumptions still run (spec §4.5).

use crate::event_bus::DataEventKind;
use crate::executor::context::ActionContext;
use crate::program::Severity;
use crate::value::Value;

use super::{StepError, StepOutcome, StepRuntime};

pub fn execute(
    step: &crate::program::ValidateStep,
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
) -> Result<StepOutcome, StepError> {
    let current = ctx.response().cloned().unwrap_or(Value::Null);

    for assumption in &step.assumptions {
        let holds = runtime.mission.evaluator.evaluate(&assumption.constraint, ctx, Some(&current))?.is_truthy();
        if holds {
            continue;
        }
        match assumption.severity {
            Severity::Error => {
                return Err(StepError::ValidationFailed {
                    name: assumption.name.clone(),
                    constraint: assumption.constraint.to_string(),
                });
            }
            Severity::Warning => {
                runtime.emit_data(
                    DataEventKind::Validate,
                    Some(format!("assumption '{}' failed (warning)", assumption.name)),
                );
            }
        }
    }
    Ok(StepOutcome::none())
}

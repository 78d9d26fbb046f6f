//! `store` step: persists the current response into a named store, keyed
//! by an evaluated expression or, absent one, the response's own `id`
//! field (spec §4.5). A list-valued response is stored item by item
//! through the adapter's bulk path rather than as one record.

use crate::event_bus::DataEventKind;
use crate::executor::context::ActionContext;
use crate::value::Value;

use super::{StepError, StepOutcome, StepRuntime};

pub async fn execute(
    step: &crate::program::StoreStep,
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
) -> Result<StepOutcome, StepError> {
    let store = runtime.mission.store(&step.store).ok_or_else(|| StepError::UnknownStore(step.store.clone()))?;
    let current = ctx.response().cloned().unwrap_or(Value::Null);

    if let Value::List(items) = &current {
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let key = match &step.key {
                Some(expr) => runtime.mission.evaluator.evaluate(expr, ctx, Some(item))?,
                None => item.get_field("id").cloned().unwrap_or(Value::Null),
            };
            records.push((key.to_string(), item.clone()));
        }
        let count = records.len();
        if step.partial {
            store.bulk_upsert(records).await?;
        } else {
            store.bulk_set(records).await?;
        }
        runtime.emit_data(DataEventKind::Store, Some(format!("stored {count} records into '{}'", step.store)));
        return Ok(StepOutcome::none());
    }

    let key = match &step.key {
        Some(expr) => runtime.mission.evaluator.evaluate(expr, ctx, Some(&current))?,
        None => current.get_field("id").cloned().unwrap_or(Value::Null),
    };
    let key = key.to_string();

    if step.partial {
        store.update(&key, current).await?;
    } else {
        store.set(&key, current).await?;
    }

    runtime.emit_data(DataEventKind::Store, Some(format!("stored key '{key}' into '{}'", step.store)));
    Ok(StepOutcome::none())
}

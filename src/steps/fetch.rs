//! `fetch` step: issues an HTTP request (optionally paginated, optionally
//! scoped by a `since` checkpoint) and lands the result in the response
//! register (spec §4.5).

use chrono::{DateTime, Utc};

use crate::event_bus::FetchEventKind;
use crate::executor::context::ActionContext;
use crate::executor::persistence::SyncCheckpoint;
use crate::http::client::HttpRequest;
use crate::pagination::{CacheKey, PaginationError, Paginator};
use crate::program::SinceFormat;
use crate::value::Value;

use super::{StepError, StepOutcome, StepRuntime};

pub async fn execute(
    step: &crate::program::FetchStep,
    ctx: &mut ActionContext,
    runtime: &StepRuntime<'_>,
    step_index: usize,
) -> Result<StepOutcome, StepError> {
    let source = step
        .source
        .clone()
        .or_else(|| runtime.mission.sole_source().map(str::to_string))
        .ok_or_else(|| StepError::UnknownSource(step.path.clone()))?;
    let http_client = runtime
        .mission
        .http_client(&source)
        .ok_or_else(|| StepError::UnknownSource(source.clone()))?
        .clone();

    let current = ctx.response().cloned();
    let mut request = HttpRequest::new(step.method, step.path.clone());
    request.retry = step.retry.clone();
    for (name, expr) in &step.query {
        let value = runtime.mission.evaluator.evaluate(expr, ctx, current.as_ref())?;
        request.query.push((name.clone(), value));
    }
    for (name, expr) in &step.headers {
        let value = runtime.mission.evaluator.evaluate(expr, ctx, current.as_ref())?;
        request.headers.push((name.clone(), value.to_string()));
    }
    if let Some(expr) = &step.body {
        request.body = Some(runtime.mission.evaluator.evaluate(expr, ctx, current.as_ref())?);
    }

    if let Some(since_spec) = &step.since {
        if let Some(checkpoint) = runtime.mission.checkpoints.get(&source, runtime.action).await {
            let value = format_since(checkpoint.timestamp, since_spec.format);
            request.query.push((since_spec.param.clone(), value));
        }
    }

    runtime.emit_fetch(FetchEventKind::Start, &source, 1, None, None);

    let response = if let Some(spec) = &step.paginate {
        let paginator = Paginator::new(http_client, runtime.mission.pagination_cache.clone());
        let cache_key = CacheKey { action: runtime.action.to_string(), step_index };
        let until_ctx = &*ctx;
        let result = paginator
            .fetch_all(request, spec, cache_key, runtime.cancel, |page| match &spec.until {
                Some(expr) => runtime.mission.evaluator.evaluate(expr, until_ctx, Some(page)).map(|v| v.is_truthy()).unwrap_or(false),
                None => false,
            })
            .await;
        match result {
            Ok(items) => Value::List(items),
            Err(err) => {
                runtime.emit_fetch(FetchEventKind::Error, &source, 1, None, Some(err.to_string()));
                if let PaginationError::PaginationLimit { partial, .. } = &err {
                    // The pages already fetched are not lost: land them on
                    // the response before the limit error propagates.
                    ctx.set_response(Value::List(partial.clone()));
                }
                return Err(err.into());
            }
        }
    } else {
        match http_client.execute(request, runtime.cancel).await {
            Ok(response) => response.body,
            Err(err) => {
                runtime.emit_fetch(FetchEventKind::Error, &source, 1, None, Some(err.to_string()));
                return Err(err.into());
            }
        }
    };

    if step.since.is_some() {
        runtime
            .mission
            .checkpoints
            .commit(&source, runtime.action, SyncCheckpoint { timestamp: Utc::now(), cursor: None })
            .await;
    }

    runtime.emit_fetch(FetchEventKind::Complete, &source, 1, None, None);
    ctx.set_response(response);
    Ok(StepOutcome::none())
}

fn format_since(timestamp: DateTime<Utc>, format: SinceFormat) -> Value {
    match format {
        SinceFormat::Iso => Value::String(timestamp.to_rfc3339()),
        SinceFormat::Unix => Value::Int(timestamp.timestamp()),
        SinceFormat::UnixMs => Value::Int(timestamp.timestamp_millis()),
    }
}

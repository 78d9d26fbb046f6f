//! Per-source (optionally per-endpoint) rate limiter (spec §4.2.1).
//!
//! State is updated from response headers and consulted by
//! [`crate::http::client::HttpClient`] before every attempt. The
//! bucket-arithmetic idiom — a plain struct behind a mutex-guarded map,
//! refill/consult/consume split into discrete methods, unit-tested in
//! isolation before the async wait API — is grounded on the rate-limiter
//! idiom used elsewhere in the retrieval pack for per-key request quotas.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;

use crate::event_bus::{Event, EventEmitter, ResilienceEvent, ResilienceEventKind};
use crate::program::{RateLimitPolicyConfig, RateLimitStrategy};

use super::ResilienceKey;

const STALE_PRUNE_THRESHOLD: usize = 1000;
const MAX_STALE_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limited on {key}: resets at {reset_at}")]
    RateLimited { key: ResilienceKey, reset_at: DateTime<Utc> },
    #[error("timed out waiting for rate-limit capacity on {key} after {waited_secs}s")]
    Timeout { key: ResilienceKey, waited_secs: u64 },
}

#[derive(Clone, Debug, Default)]
struct RateLimitEntry {
    remaining: Option<u32>,
    limit: Option<u32>,
    reset_at: Option<DateTime<Utc>>,
    retry_after_at: Option<DateTime<Utc>>,
    last_request_at: Option<DateTime<Utc>>,
}

/// A parsed slice of the subset of response headers the rate limiter cares
/// about. Built by the HTTP client from the real `reqwest::Response`
/// headers so this module stays transport-agnostic and unit-testable.
#[derive(Clone, Debug, Default)]
pub struct RateLimitHeaders {
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    pub reset: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
}

impl RateLimitHeaders {
    /// Parse from a lowercase-keyed header map, accepting both the
    /// `X-RateLimit-*` and draft `RateLimit-*` header families, seconds or
    /// HTTP-date `Retry-After`, and Unix-seconds or Unix-milliseconds reset
    /// values.
    #[must_use]
    pub fn parse(headers: &FxHashMap<String, String>) -> Self {
        let remaining = find_header(headers, &["x-ratelimit-remaining", "ratelimit-remaining"])
            .and_then(|v| v.parse::<u32>().ok());
        let limit = find_header(headers, &["x-ratelimit-limit", "ratelimit-limit"])
            .and_then(|v| v.parse::<u32>().ok());
        let reset = find_header(headers, &["x-ratelimit-reset", "ratelimit-reset"])
            .and_then(|v| parse_epoch_or_delta(&v));
        let retry_after = find_header(headers, &["retry-after"]).and_then(|v| parse_retry_after(&v));
        Self { remaining, limit, reset, retry_after }
    }
}

fn find_header(headers: &FxHashMap<String, String>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| headers.get(*n).cloned())
}

/// Accepts Unix-seconds, Unix-milliseconds, or a relative "seconds from now"
/// value — whichever parses into a plausible instant.
fn parse_epoch_or_delta(raw: &str) -> Option<DateTime<Utc>> {
    let n: i64 = raw.trim().parse().ok()?;
    if n <= 0 {
        return None;
    }
    // Treat anything below a 2001-ish epoch-seconds threshold as a relative
    // "seconds from now" delta (some APIs send reset-in-seconds instead of
    // an absolute Unix timestamp under this same header name).
    if n < 1_000_000_000 {
        return Some(Utc::now() + chrono::Duration::seconds(n));
    }
    // Millisecond epochs are ~1000x larger than second epochs at any date
    // in this millennium; 10_000_000_000 comfortably separates the two.
    if n > 10_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

fn parse_retry_after(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(secs) = trimmed.parse::<i64>() {
        return Some(Utc::now() + chrono::Duration::seconds(secs.max(0)));
    }
    DateTime::parse_from_rfc2822(trimmed)
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

pub struct RateLimiter {
    entries: Mutex<FxHashMap<ResilienceKey, RateLimitEntry>>,
    emitter: Option<Arc<dyn EventEmitter>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(emitter: Option<Arc<dyn EventEmitter>>) -> Self {
        Self { entries: Mutex::new(FxHashMap::default()), emitter }
    }

    /// Update state from a response's headers. `was_429` additionally feeds
    /// `Retry-After` into the wait deadline even when the other rate-limit
    /// headers are absent.
    #[instrument(skip(self, headers), fields(key = %key))]
    pub fn record_response(&self, key: &ResilienceKey, headers: &RateLimitHeaders, was_429: bool) {
        let mut guard = self.entries.lock();
        let entry = guard.entry(key.clone()).or_default();
        if let Some(r) = headers.remaining {
            entry.remaining = Some(r);
        }
        if let Some(l) = headers.limit {
            entry.limit = Some(l);
        }
        if let Some(reset) = headers.reset {
            entry.reset_at = Some(reset);
        }
        if was_429 {
            entry.retry_after_at = headers.retry_after.or(entry.reset_at);
            entry.remaining = Some(0);
        } else if headers.retry_after.is_some() {
            entry.retry_after_at = headers.retry_after;
        }
        entry.last_request_at = Some(Utc::now());

        if guard.len() > STALE_PRUNE_THRESHOLD {
            let now = Utc::now();
            guard.retain(|_, e| {
                e.last_request_at
                    .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default() < MAX_STALE_AGE)
                    .unwrap_or(true)
            });
        }
    }

    /// Blocks (asynchronously) until a request to `key` may proceed under
    /// `policy`'s strategy. Never holds the state mutex across an `.await`.
    #[instrument(skip(self, policy), fields(key = %key))]
    pub async fn wait_for_capacity(
        &self,
        key: &ResilienceKey,
        policy: &RateLimitPolicyConfig,
    ) -> Result<(), RateLimitError> {
        match policy.strategy {
            RateLimitStrategy::Fail => self.wait_fail(key),
            RateLimitStrategy::Pause => self.wait_pause(key, policy).await,
            RateLimitStrategy::Throttle => self.wait_throttle(key, policy).await,
        }
    }

    fn wait_fail(&self, key: &ResilienceKey) -> Result<(), RateLimitError> {
        let snapshot = self.snapshot(key);
        if depleted(&snapshot) {
            let reset_at = deadline(&snapshot).unwrap_or_else(Utc::now);
            return Err(RateLimitError::RateLimited { key: key.clone(), reset_at });
        }
        Ok(())
    }

    async fn wait_pause(
        &self,
        key: &ResilienceKey,
        policy: &RateLimitPolicyConfig,
    ) -> Result<(), RateLimitError> {
        let snapshot = self.snapshot(key);
        if !depleted(&snapshot) {
            return Ok(());
        }
        let Some(until) = deadline(&snapshot) else {
            return Ok(());
        };
        let now = Utc::now();
        if until <= now {
            self.clear_depletion(key);
            return Ok(());
        }
        let total_wait = (until - now).to_std().unwrap_or_default();
        let max_wait = Duration::from_secs(policy.max_wait_secs);
        if total_wait > max_wait {
            return Err(RateLimitError::Timeout { key: key.clone(), waited_secs: max_wait.as_secs() });
        }

        self.emit(ResilienceEventKind::RateLimited, key, Some(until));
        let signal_interval = Duration::from_secs(policy.waiting_signal_interval_secs.max(1));
        let mut remaining = total_wait;
        while !remaining.is_zero() {
            let step = remaining.min(signal_interval);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
            if !remaining.is_zero() {
                self.emit(ResilienceEventKind::RateWaiting, key, Some(until));
            }
        }
        self.clear_depletion(key);
        self.emit(ResilienceEventKind::RateResumed, key, None);
        Ok(())
    }

    async fn wait_throttle(
        &self,
        key: &ResilienceKey,
        policy: &RateLimitPolicyConfig,
    ) -> Result<(), RateLimitError> {
        let snapshot = self.snapshot(key);
        let now = Utc::now();
        let delay = match (snapshot.reset_at, snapshot.remaining, snapshot.last_request_at) {
            (Some(reset), Some(remaining), Some(last)) if remaining > 0 => {
                let until_reset = (reset - now).to_std().unwrap_or_default();
                let spacing = until_reset / remaining.max(1);
                let since_last = (now - last).to_std().unwrap_or_default();
                spacing.saturating_sub(since_last)
            }
            _ => {
                let spacing = Duration::from_secs_f64(60.0 / f64::from(policy.fallback_rpm.max(1)));
                match snapshot.last_request_at {
                    Some(last) => spacing.saturating_sub((now - last).to_std().unwrap_or_default()),
                    None => Duration::ZERO,
                }
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn snapshot(&self, key: &ResilienceKey) -> RateLimitEntry {
        self.entries.lock().get(key).cloned().unwrap_or_default()
    }

    fn clear_depletion(&self, key: &ResilienceKey) {
        let mut guard = self.entries.lock();
        if let Some(entry) = guard.get_mut(key) {
            entry.remaining = entry.limit.or(Some(1));
            entry.retry_after_at = None;
        }
    }

    fn emit(&self, kind: ResilienceEventKind, key: &ResilienceKey, until: Option<DateTime<Utc>>) {
        let Some(emitter) = &self.emitter else { return };
        let details = until.map(|u| serde_json::json!({ "reset_at": u.to_rfc3339() })).unwrap_or_default();
        let _ = emitter.emit(Event::Resilience(ResilienceEvent {
            kind,
            source: key.source.clone(),
            endpoint: key.endpoint.clone(),
            details,
            message: None,
            when: Utc::now(),
        }));
    }
}

fn depleted(entry: &RateLimitEntry) -> bool {
    entry.retry_after_at.is_some() || entry.remaining == Some(0)
}

fn deadline(entry: &RateLimitEntry) -> Option<DateTime<Utc>> {
    entry.retry_after_at.or(entry.reset_at)
}

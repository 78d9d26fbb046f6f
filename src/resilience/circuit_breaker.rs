//! Per-source (optionally per-endpoint) circuit breaker (spec §4.2.2).
//!
//! A plain three-state enum with explicit transitions and inherent methods
//! — no hidden state, `Display`-able — mirroring this crate's other
//! state-machine types (`program::Step`, `steps::flow::FlowSignal`). The
//! circuit breaker never calls the rate limiter or HTTP client; it is
//! consulted first in the per-attempt sequence (spec §4.3, §5). Half-open
//! admits exactly one in-flight probe at a time; every other caller is
//! rejected until that probe's outcome is recorded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;

use crate::event_bus::{Event, EventEmitter, ResilienceEvent, ResilienceEventKind};
use crate::program::CircuitBreakerConfig;

use super::ResilienceKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("circuit open for {key}: next attempt in {next_attempt_in:?}")]
    Open { key: ResilienceKey, next_attempt_in: Duration },
}

#[derive(Debug, Default)]
struct CircuitEntry {
    state: CircuitState,
    failures: VecDeque<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    half_open_successes: u32,
    /// Gates half-open to exactly one outstanding probe at a time; set when
    /// a caller is admitted, cleared when that probe's outcome is recorded.
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    entries: Mutex<FxHashMap<ResilienceKey, CircuitEntry>>,
    emitter: Option<Arc<dyn EventEmitter>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(emitter: Option<Arc<dyn EventEmitter>>) -> Self {
        Self { entries: Mutex::new(FxHashMap::default()), emitter }
    }

    #[must_use]
    pub fn state(&self, key: &ResilienceKey) -> CircuitState {
        self.entries.lock().get(key).map(|e| e.state).unwrap_or_default()
    }

    /// Consulted before the rate limiter on every attempt. Synchronous —
    /// never suspends, so it never needs to release its lock mid-check.
    #[instrument(skip(self, config), fields(key = %key))]
    pub fn check(&self, key: &ResilienceKey, config: &CircuitBreakerConfig) -> Result<(), CircuitBreakerError> {
        let transitioned_half_open;
        let result = {
            let mut guard = self.entries.lock();
            let entry = guard.entry(key.clone()).or_default();
            match entry.state {
                CircuitState::Closed => {
                    transitioned_half_open = false;
                    Ok(())
                }
                CircuitState::HalfOpen => {
                    transitioned_half_open = false;
                    if entry.probe_in_flight {
                        Err(CircuitBreakerError::Open { key: key.clone(), next_attempt_in: Duration::ZERO })
                    } else {
                        entry.probe_in_flight = true;
                        Ok(())
                    }
                }
                CircuitState::Open => {
                    let opened_at = entry.opened_at.unwrap_or_else(Utc::now);
                    let reset_timeout = chrono::Duration::milliseconds(config.reset_timeout_ms as i64);
                    let next_attempt = opened_at + reset_timeout;
                    let now = Utc::now();
                    if now >= next_attempt {
                        entry.state = CircuitState::HalfOpen;
                        entry.half_open_successes = 0;
                        entry.probe_in_flight = true;
                        transitioned_half_open = true;
                        Ok(())
                    } else {
                        transitioned_half_open = false;
                        let next_attempt_in = (next_attempt - now).to_std().unwrap_or_default();
                        Err(CircuitBreakerError::Open { key: key.clone(), next_attempt_in })
                    }
                }
            }
        };

        if transitioned_half_open {
            self.emit(ResilienceEventKind::CircuitHalfOpen, key, serde_json::Value::Null);
        }
        if let Err(CircuitBreakerError::Open { next_attempt_in, .. }) = &result {
            self.emit(
                ResilienceEventKind::CircuitRejected,
                key,
                serde_json::json!({ "next_attempt_in_ms": next_attempt_in.as_millis() as u64 }),
            );
        }
        result
    }

    /// Record a successful response (status < 500, no transport error).
    #[instrument(skip(self, config), fields(key = %key))]
    pub fn record_success(&self, key: &ResilienceKey, config: &CircuitBreakerConfig) {
        let closed;
        {
            let mut guard = self.entries.lock();
            let entry = guard.entry(key.clone()).or_default();
            match entry.state {
                CircuitState::Closed => {
                    closed = false;
                }
                CircuitState::HalfOpen => {
                    entry.probe_in_flight = false;
                    entry.half_open_successes += 1;
                    if entry.half_open_successes >= config.success_threshold {
                        entry.state = CircuitState::Closed;
                        entry.failures.clear();
                        entry.opened_at = None;
                        closed = true;
                    } else {
                        closed = false;
                    }
                }
                CircuitState::Open => closed = false,
            }
        }
        if closed {
            self.emit(ResilienceEventKind::CircuitClosed, key, serde_json::Value::Null);
        }
    }

    /// Record a failure (5xx status or network error, per `config`'s
    /// `failure_status_codes` / the caller's own network-error check).
    #[instrument(skip(self, config), fields(key = %key))]
    pub fn record_failure(&self, key: &ResilienceKey, config: &CircuitBreakerConfig) {
        let opened;
        {
            let mut guard = self.entries.lock();
            let entry = guard.entry(key.clone()).or_default();
            let now = Utc::now();
            let window = chrono::Duration::milliseconds(config.rolling_window_ms as i64);
            entry.failures.retain(|t| now.signed_duration_since(*t) <= window);

            match entry.state {
                CircuitState::HalfOpen => {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(now);
                    entry.failures.clear();
                    entry.failures.push_back(now);
                    entry.probe_in_flight = false;
                    opened = true;
                }
                CircuitState::Closed => {
                    entry.failures.push_back(now);
                    if entry.failures.len() as u32 >= config.failure_threshold {
                        entry.state = CircuitState::Open;
                        entry.opened_at = Some(now);
                        opened = true;
                    } else {
                        opened = false;
                    }
                }
                CircuitState::Open => opened = false,
            }
        }
        if opened {
            self.emit(ResilienceEventKind::CircuitOpened, key, serde_json::Value::Null);
        }
    }

    fn emit(&self, kind: ResilienceEventKind, key: &ResilienceKey, details: serde_json::Value) {
        let Some(emitter) = &self.emitter else { return };
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

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 50,
            success_threshold: 1,
            rolling_window_ms: 60_000,
            failure_status_codes: (500..=599).collect(),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(None);
        let key = ResilienceKey::source_only("api");
        let cfg = config();
        for _ in 0..3 {
            cb.record_failure(&key, &cfg);
        }
        assert_eq!(cb.state(&key), CircuitState::Open);
        assert!(cb.check(&key, &cfg).is_err());
    }

    #[test]
    fn never_opens_from_4xx() {
        // record_failure is only ever called by the HTTP client for
        // statuses in failure_status_codes; verifying the breaker itself
        // doesn't special-case status codes (caller's responsibility).
        let cb = CircuitBreaker::new(None);
        let key = ResilienceKey::source_only("api");
        let cfg = config();
        cb.record_success(&key, &cfg);
        assert_eq!(cb.state(&key), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_half_open_after_reset_timeout_then_closes() {
        let cb = CircuitBreaker::new(None);
        let key = ResilienceKey::source_only("api");
        let cfg = config();
        for _ in 0..3 {
            cb.record_failure(&key, &cfg);
        }
        assert!(cb.check(&key, &cfg).is_err());

        tokio::time::advance(Duration::from_millis(25)).await;
        assert!(cb.check(&key, &cfg).is_err());

        tokio::time::advance(Duration::from_millis(30)).await;
        assert!(cb.check(&key, &cfg).is_ok());
        assert_eq!(cb.state(&key), CircuitState::HalfOpen);

        cb.record_success(&key, &cfg);
        assert_eq!(cb.state(&key), CircuitState::Closed);
        assert!(cb.check(&key, &cfg).is_ok());
    }

    #[test]
    fn half_open_gates_exactly_one_probe_and_releases_after_resolution() {
        let cb = CircuitBreaker::new(None);
        let key = ResilienceKey::source_only("api");
        let cfg = CircuitBreakerConfig { reset_timeout_ms: 0, success_threshold: 2, ..config() };
        for _ in 0..3 {
            cb.record_failure(&key, &cfg);
        }
        assert!(cb.check(&key, &cfg).is_ok());
        assert_eq!(cb.state(&key), CircuitState::HalfOpen);

        assert!(cb.check(&key, &cfg).is_err(), "a second probe must not be admitted while the first is in flight");

        cb.record_success(&key, &cfg);
        assert_eq!(cb.state(&key), CircuitState::HalfOpen, "one success below success_threshold stays half-open");
        assert!(cb.check(&key, &cfg).is_ok(), "the gate releases once the in-flight probe resolves");
    }

    #[tokio::test(start_paused = true)]
    async fn failure_in_half_open_reopens_and_resets_timer() {
        let cb = CircuitBreaker::new(None);
        let key = ResilienceKey::source_only("api");
        let cfg = config();
        for _ in 0..3 {
            cb.record_failure(&key, &cfg);
        }
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(cb.check(&key, &cfg).is_ok());
        assert_eq!(cb.state(&key), CircuitState::HalfOpen);

        cb.record_failure(&key, &cfg);
        assert_eq!(cb.state(&key), CircuitState::Open);
        assert!(cb.check(&key, &cfg).is_err());
    }
}

//! Rate limiter and circuit breaker state shared across requests to a
//! source (spec §4.2). Both are consulted by the HTTP client in a fixed
//! order — circuit breaker first, then rate limiter — and neither ever
//! calls the other or the HTTP client directly (spec §5: deadlock freedom).

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use rate_limiter::{RateLimitError, RateLimiter};

/// Key identifying a resilience entry: a source, optionally narrowed to one
/// endpoint. Two requests to the same source but different endpoints get
/// independent rate-limit/circuit-breaker state when `endpoint` is set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResilienceKey {
    pub source: String,
    pub endpoint: Option<String>,
}

impl ResilienceKey {
    #[must_use]
    pub fn source_only(source: impl Into<String>) -> Self {
        Self { source: source.into(), endpoint: None }
    }

    #[must_use]
    pub fn with_endpoint(source: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { source: source.into(), endpoint: Some(endpoint.into()) }
    }
}

impl std::fmt::Display for ResilienceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.endpoint {
            Some(e) => write!(f, "{}:{}", self.source, e),
            None => write!(f, "{}", self.source),
        }
    }
}

//! Resilient per-source HTTP client (spec §4.3).
//!
//! One `HttpClient` is built per declared source at mission setup and
//! shared (via `Arc`) across every action that fetches from it. The
//! attempt loop is a fixed nine-step sequence; each numbered comment below
//! matches the step it implements so the contract stays checkable against
//! the spec rather than just against this file's own tests.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::http::auth::{AuthError, AuthProvider};
use crate::http::backoff::compute_delay;
use crate::program::{CircuitBreakerConfig, HttpMethod, RateLimitPolicyConfig, RetryPolicy};
use crate::resilience::{CircuitBreaker, CircuitBreakerError, RateLimitError, RateLimiter, ResilienceKey};
use crate::value::Value;

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("request to {path} failed with status {status}: {body}")]
    Http { path: String, status: u16, body: Value },
    #[error("network error after {attempts} attempt(s): {source}")]
    Network { attempts: u32, source: reqwest::Error },
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    /// Already-evaluated query parameters, insertion order preserved.
    pub query: Vec<(String, Value)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Narrows the resilience key to a single endpoint when set, so e.g.
    /// `/users` and `/orders` on the same source get independent rate-limit
    /// and circuit-breaker state.
    pub endpoint: Option<String>,
    pub retry: Option<RetryPolicy>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: Vec::new(), headers: Vec::new(), body: None, endpoint: None, retry: None }
    }
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: FxHashMap<String, String>,
    pub body: Value,
}

pub struct HttpClient {
    source: String,
    base_url: String,
    http: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limit_policy: RateLimitPolicyConfig,
    circuit_breaker_policy: CircuitBreakerConfig,
}

impl HttpClient {
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        base_url: impl Into<String>,
        http: reqwest::Client,
        auth: Arc<dyn AuthProvider>,
        rate_limiter: Arc<RateLimiter>,
        circuit_breaker: Arc<CircuitBreaker>,
        rate_limit_policy: RateLimitPolicyConfig,
        circuit_breaker_policy: CircuitBreakerConfig,
    ) -> Self {
        Self {
            source: source.into(),
            base_url: base_url.into(),
            http,
            auth,
            rate_limiter,
            circuit_breaker,
            rate_limit_policy,
            circuit_breaker_policy,
        }
    }

    fn resilience_key(&self, endpoint: Option<&str>) -> ResilienceKey {
        match endpoint {
            Some(e) => ResilienceKey::with_endpoint(self.source.clone(), e),
            None => ResilienceKey::source_only(self.source.clone()),
        }
    }

    #[instrument(skip(self, request, cancel), fields(source = %self.source, path = %request.path))]
    pub async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpClientError> {
        let key = self.resilience_key(request.endpoint.as_deref());
        let retry = request.retry.clone().unwrap_or(RetryPolicy {
            max_attempts: 1,
            backoff: crate::program::BackoffKind::Constant,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        });

        let mut attempt = 0u32;
        let mut refreshed_once = false;
        let mut last_network_err: Option<reqwest::Error> = None;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(HttpClientError::Cancelled);
            }

            // 1. Consult circuit breaker.
            self.circuit_breaker.check(&key, &self.circuit_breaker_policy)?;
            // 2. Await rate-limit capacity.
            self.rate_limiter.wait_for_capacity(&key, &self.rate_limit_policy).await?;
            // 3. Resolve auth (refreshes OAuth2 internally if near expiry).
            let auth_header = self.auth.header().await?;

            let built = self.build_request(&request, auth_header.as_ref());
            // 4. Issue the request.
            let sent = tokio::select! {
                res = built.send() => res,
                _ = cancel.cancelled() => return Err(HttpClientError::Cancelled),
            };

            let response = match sent {
                Ok(r) => r,
                Err(err) => {
                    self.circuit_breaker.record_failure(&key, &self.circuit_breaker_policy);
                    last_network_err = Some(err);
                    if attempt >= retry.max_attempts {
                        return Err(HttpClientError::Network {
                            attempts: attempt,
                            source: last_network_err.expect("just assigned"),
                        });
                    }
                    self.sleep_cancellable(compute_delay(&retry, attempt), cancel).await?;
                    continue;
                }
            };

            let status = response.status().as_u16();
            let headers = flatten_headers(response.headers());
            let rl_headers = crate::resilience::rate_limiter::RateLimitHeaders::parse(&headers);

            // 5. Record response headers into the rate limiter.
            self.rate_limiter.record_response(&key, &rl_headers, status == 429);

            // 6. 429 — not a circuit-breaker failure; retry if attempts remain.
            if status == 429 {
                if attempt >= retry.max_attempts {
                    let body = parse_body(response, &headers).await;
                    return Err(HttpClientError::Http { path: request.path, status, body });
                }
                continue;
            }

            // 8. 401 with a refresh-capable provider: refresh once, retry.
            if status == 401 && self.auth.supports_refresh() && !refreshed_once {
                refreshed_once = true;
                self.auth.force_refresh().await?;
                continue;
            }

            // 7. >=500 — record circuit-breaker failure, backoff-and-retry.
            if status >= 500 && self.circuit_breaker_policy.failure_status_codes.contains(&status) {
                self.circuit_breaker.record_failure(&key, &self.circuit_breaker_policy);
                if attempt >= retry.max_attempts {
                    let body = parse_body(response, &headers).await;
                    return Err(HttpClientError::Http { path: request.path, status, body });
                }
                self.sleep_cancellable(compute_delay(&retry, attempt), cancel).await?;
                continue;
            }

            // 9. Success path (2xx/3xx and non-auth 4xx).
            if status < 500 {
                self.circuit_breaker.record_success(&key, &self.circuit_breaker_policy);
            }
            let body = parse_body(response, &headers).await;
            if status >= 400 {
                return Err(HttpClientError::Http { path: request.path, status, body });
            }
            return Ok(HttpResponse { status, headers, body });
        }
    }

    async fn sleep_cancellable(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), HttpClientError> {
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = cancel.cancelled() => Err(HttpClientError::Cancelled),
        }
    }

    fn build_request(
        &self,
        request: &HttpRequest,
        auth_header: Option<&(HeaderName, HeaderValue)>,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url),
            HttpMethod::Put => self.http.put(&url),
            HttpMethod::Patch => self.http.patch(&url),
            HttpMethod::Delete => self.http.delete(&url),
        };

        if !request.query.is_empty() {
            let pairs: Vec<(String, String)> =
                request.query.iter().map(|(k, v)| (k.clone(), v.to_string())).collect();
            builder = builder.query(&pairs);
        }

        let mut header_map = HeaderMap::new();
        if let Some((name, value)) = auth_header {
            header_map.insert(name.clone(), value.clone());
        }
        for (name, value) in &request.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                header_map.insert(name, value);
            }
        }
        builder = builder.headers(header_map);

        if let Some(body) = &request.body {
            builder = builder.json(&body.to_json());
        }
        builder
    }
}

fn flatten_headers(headers: &HeaderMap) -> FxHashMap<String, String> {
    let mut out = FxHashMap::default();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }
    out
}

async fn parse_body(response: reqwest::Response, headers: &FxHashMap<String, String>) -> Value {
    let is_json = headers.get("content-type").is_some_and(|ct| ct.contains("json"));
    if is_json {
        match response.json::<serde_json::Value>().await {
            Ok(json) => Value::from_json(json),
            Err(err) => Value::String(format!("<unparseable json body: {err}>")),
        }
    } else {
        match response.text().await {
            Ok(text) => Value::String(text),
            Err(err) => Value::String(format!("<unreadable body: {err}>")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::auth::NoAuth;
    use crate::program::{BackoffKind, RateLimitStrategy};

    fn client(base_url: String) -> HttpClient {
        HttpClient::new(
            "demo",
            base_url,
            reqwest::Client::new(),
            Arc::new(NoAuth),
            Arc::new(RateLimiter::new(None)),
            Arc::new(CircuitBreaker::new(None)),
            RateLimitPolicyConfig { strategy: RateLimitStrategy::Pause, ..Default::default() },
            CircuitBreakerConfig::default(),
        )
    }

    #[tokio::test]
    async fn success_path_parses_json_body() {
        let server = httpmock::MockServer::start_async().await;
        let _m = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/users/1");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({ "id": 1, "name": "Ada" }));
            })
            .await;

        let client = client(server.base_url());
        let cancel = CancellationToken::new();
        let response = client.execute(HttpRequest::new(HttpMethod::Get, "/users/1"), &cancel).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.get_field("name"), Some(&Value::String("Ada".into())));
    }

    #[tokio::test]
    async fn retries_on_500_then_succeeds() {
        let server = httpmock::MockServer::start_async().await;
        let fail = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/flaky");
                then.status(500);
            })
            .await;

        let client = client(server.base_url());
        let cancel = CancellationToken::new();
        let retry = RetryPolicy { max_attempts: 2, backoff: BackoffKind::Constant, initial_delay_ms: 1, max_delay_ms: 5 };
        let mut request = HttpRequest::new(HttpMethod::Get, "/flaky");
        request.retry = Some(retry);
        let result = client.execute(request, &cancel).await;
        assert!(matches!(result, Err(HttpClientError::Http { status: 500, .. })));
        assert_eq!(fail.hits_async().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn non_auth_4xx_is_not_retried() {
        let server = httpmock::MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/missing");
                then.status(404).header("content-type", "text/plain").body("not found");
            })
            .await;

        let client = client(server.base_url());
        let cancel = CancellationToken::new();
        let result = client.execute(HttpRequest::new(HttpMethod::Get, "/missing"), &cancel).await;
        assert!(matches!(result, Err(HttpClientError::Http { status: 404, .. })));
        assert_eq!(m.hits_async().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_send() {
        let server = httpmock::MockServer::start_async().await;
        let client = client(server.base_url());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.execute(HttpRequest::new(HttpMethod::Get, "/anything"), &cancel).await;
        assert!(matches!(result, Err(HttpClientError::Cancelled)));
    }
}

//! Auth providers (spec §4.3 step 3, §6 credentials file).
//!
//! One [`AuthProvider`] per source, built once at mission setup from the
//! resolved [`Credentials`] and handed to the [`HttpClient`](super::client::HttpClient)
//! for that source. OAuth2 is the only kind that suspends and the only one
//! that needs single-flight refresh coalescing — grounded on the teacher's
//! `RwLock<Option<Sender<Event>>>` swap-under-lock idiom in `EventHub`, here
//! a `tokio::sync::Mutex` gate around a double-checked expiry read.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderName, HeaderValue};
use thiserror::Error;

use crate::executor::context::Credentials;
use crate::program::AuthKind;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("source '{source}' is configured for {kind:?} auth but is missing credential field '{field}'")]
    MissingField { source: String, kind: AuthKind, field: &'static str },
    #[error("token refresh request failed: {0}")]
    RefreshFailed(#[from] reqwest::Error),
    #[error("token endpoint returned a response this client could not parse: {0}")]
    RefreshResponse(String),
    #[error("{0} does not support refresh")]
    NotRefreshable(&'static str),
}

/// A single `(header name, header value)` pair to attach to the request, or
/// `None` for sources with no auth.
pub type AuthHeader = Option<(HeaderName, HeaderValue)>;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current header to attach. For OAuth2 this refreshes first if the
    /// access token is within `refresh_buffer` of expiry.
    async fn header(&self) -> Result<AuthHeader, AuthError>;

    /// Whether this provider can service a 401-triggered refresh
    /// (spec §4.3 step 8). Bearer/ApiKey/Basic/None cannot.
    fn supports_refresh(&self) -> bool {
        false
    }

    /// Force a refresh regardless of expiry, coalescing concurrent callers
    /// behind one in-flight request. Only meaningful when `supports_refresh`.
    async fn force_refresh(&self) -> Result<(), AuthError> {
        Err(AuthError::NotRefreshable(self.kind_name()))
    }

    fn kind_name(&self) -> &'static str;
}

pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn header(&self) -> Result<AuthHeader, AuthError> {
        Ok(None)
    }

    fn kind_name(&self) -> &'static str {
        "none"
    }
}

pub struct BearerAuth {
    token: String,
}

#[async_trait]
impl AuthProvider for BearerAuth {
    async fn header(&self) -> Result<AuthHeader, AuthError> {
        let value = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| AuthError::RefreshResponse(e.to_string()))?;
        Ok(Some((HeaderName::from_static("authorization"), value)))
    }

    fn kind_name(&self) -> &'static str {
        "bearer"
    }
}

pub struct ApiKeyAuth {
    header_name: String,
    value: String,
}

#[async_trait]
impl AuthProvider for ApiKeyAuth {
    async fn header(&self) -> Result<AuthHeader, AuthError> {
        let name = HeaderName::from_bytes(self.header_name.as_bytes())
            .map_err(|e| AuthError::RefreshResponse(e.to_string()))?;
        let value = HeaderValue::from_str(&self.value).map_err(|e| AuthError::RefreshResponse(e.to_string()))?;
        Ok(Some((name, value)))
    }

    fn kind_name(&self) -> &'static str {
        "api_key"
    }
}

pub struct BasicAuth {
    username: String,
    password: String,
}

#[async_trait]
impl AuthProvider for BasicAuth {
    async fn header(&self) -> Result<AuthHeader, AuthError> {
        use base64::Engine;
        let raw = format!("{}:{}", self.username, self.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        let value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|e| AuthError::RefreshResponse(e.to_string()))?;
        Ok(Some((HeaderName::from_static("authorization"), value)))
    }

    fn kind_name(&self) -> &'static str {
        "basic"
    }
}

#[derive(Clone, Debug)]
struct OAuthState {
    access_token: String,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// OAuth2, refreshed before expiry inside `refresh_buffer` (default 5 min,
/// spec §4.3) and coalesced behind `refresh_gate` so concurrent 401s for the
/// same source issue exactly one refresh call (spec §8 property 9).
pub struct OAuth2Auth {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: RwLock<String>,
    state: RwLock<OAuthState>,
    refresh_gate: tokio::sync::Mutex<()>,
    refresh_buffer: chrono::Duration,
    /// Bumped every time a refresh actually completes. Lets `force_refresh`
    /// detect "someone already refreshed while I queued for the gate"
    /// without relying on `needs_refresh`, which is expiry-based and stays
    /// permanently false for a token whose expiry was never observed.
    refresh_generation: std::sync::atomic::AtomicU64,
}

impl OAuth2Auth {
    pub fn new(
        http: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: String,
        access_token: String,
        refresh_token: String,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id,
            client_secret,
            refresh_token: RwLock::new(refresh_token),
            state: RwLock::new(OAuthState { access_token, expires_at }),
            refresh_gate: tokio::sync::Mutex::new(()),
            refresh_buffer: chrono::Duration::minutes(5),
            refresh_generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn needs_refresh(&self) -> bool {
        let state = self.state.read();
        match state.expires_at {
            Some(exp) => chrono::Utc::now() + self.refresh_buffer >= exp,
            None => false,
        }
    }

    /// Proactive refresh (called from `header()` when near expiry). Holds
    /// the gate and rechecks `needs_refresh` so concurrent proactive
    /// refreshers don't each fire a request once the first has landed.
    async fn do_refresh(&self) -> Result<(), AuthError> {
        let _permit = self.refresh_gate.lock().await;
        if !self.needs_refresh() {
            return Ok(());
        }
        self.perform_refresh().await
    }

    /// Forced refresh (called after a 401). Coalesces concurrent callers on
    /// `refresh_generation` rather than `needs_refresh`, since a 401 can
    /// happen with no expiry ever recorded.
    async fn do_force_refresh(&self) -> Result<(), AuthError> {
        let before = self.refresh_generation.load(std::sync::atomic::Ordering::SeqCst);
        let _permit = self.refresh_gate.lock().await;
        if self.refresh_generation.load(std::sync::atomic::Ordering::SeqCst) != before {
            // Another waiter already refreshed while we queued for the gate.
            return Ok(());
        }
        self.perform_refresh().await
    }

    async fn perform_refresh(&self) -> Result<(), AuthError> {
        let refresh_token = self.refresh_token.read().clone();
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let body: TokenResponse = response.json().await?;
        let expires_at = body.expires_in.map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs));
        *self.state.write() = OAuthState { access_token: body.access_token, expires_at };
        if let Some(new_refresh) = body.refresh_token {
            *self.refresh_token.write() = new_refresh;
        }
        self.refresh_generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[async_trait]
impl AuthProvider for OAuth2Auth {
    async fn header(&self) -> Result<AuthHeader, AuthError> {
        if self.needs_refresh() {
            self.do_refresh().await?;
        }
        let token = self.state.read().access_token.clone();
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| AuthError::RefreshResponse(e.to_string()))?;
        Ok(Some((HeaderName::from_static("authorization"), value)))
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn force_refresh(&self) -> Result<(), AuthError> {
        self.do_force_refresh().await
    }

    fn kind_name(&self) -> &'static str {
        "oauth2"
    }
}

/// Builds the provider for a source from its declared [`AuthKind`] and the
/// resolved credentials bag (spec §6). `http` is reused for OAuth2's token
/// endpoint so refresh calls share the same connection pool as data requests.
pub fn build_auth_provider(
    kind: AuthKind,
    source: &str,
    credentials: &Credentials,
    http: reqwest::Client,
) -> Result<Arc<dyn AuthProvider>, AuthError> {
    let field = |name: &'static str| -> Result<String, AuthError> {
        credentials
            .get(source, name)
            .map(str::to_string)
            .ok_or(AuthError::MissingField { source: source.to_string(), kind, field: name })
    };

    Ok(match kind {
        AuthKind::None => Arc::new(NoAuth),
        AuthKind::Bearer => Arc::new(BearerAuth { token: field("token")? }),
        AuthKind::ApiKey => Arc::new(ApiKeyAuth {
            header_name: credentials.get(source, "header_name").unwrap_or("X-API-Key").to_string(),
            value: field("api_key")?,
        }),
        AuthKind::Basic => Arc::new(BasicAuth { username: field("username")?, password: field("password")? }),
        AuthKind::OAuth2 => Arc::new(OAuth2Auth::new(
            http,
            field("token_url")?,
            field("client_id")?,
            field("client_secret")?,
            field("access_token")?,
            field("refresh_token")?,
            None,
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(pairs: &[(&str, &str)]) -> Credentials {
        let mut fields = rustc_hash::FxHashMap::default();
        let mut inner = rustc_hash::FxHashMap::default();
        for (k, v) in pairs {
            inner.insert((*k).to_string(), (*v).to_string());
        }
        fields.insert("demo".to_string(), inner);
        Credentials::new(fields)
    }

    #[tokio::test]
    async fn bearer_header_round_trips() {
        let auth = BearerAuth { token: "abc123".to_string() };
        let (name, value) = auth.header().await.unwrap().unwrap();
        assert_eq!(name.as_str(), "authorization");
        assert_eq!(value.to_str().unwrap(), "Bearer abc123");
    }

    #[tokio::test]
    async fn missing_field_is_reported_by_name() {
        let credentials = creds(&[]);
        let err = build_auth_provider(AuthKind::Bearer, "demo", &credentials, reqwest::Client::new());
        assert!(matches!(err, Err(AuthError::MissingField { field: "token", .. })));
    }

    #[tokio::test]
    async fn oauth2_refresh_only_fires_once_for_concurrent_callers() {
        let auth = Arc::new(OAuth2Auth::new(
            reqwest::Client::new(),
            "http://127.0.0.1:0/token".to_string(),
            "id".into(),
            "secret".into(),
            "stale".into(),
            "refresh".into(),
            Some(chrono::Utc::now() - chrono::Duration::seconds(1)),
        ));
        // Without a live token endpoint the refresh call itself fails, but
        // both callers must still serialize through the same gate rather
        // than each independently attempting a refresh.
        let a = auth.clone();
        let b = auth.clone();
        let (r1, r2) = tokio::join!(a.force_refresh(), b.force_refresh());
        assert!(r1.is_err() && r2.is_err());
    }
}

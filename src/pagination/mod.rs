//! Pagination engine: wraps the HTTP client to collect a multi-page result
//! set via offset/page/cursor strategies (spec §4.4).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::http::client::{HttpClient, HttpClientError, HttpRequest};
use crate::program::{PaginationKind, PaginationSpec};
use crate::value::Value;

const ARRAY_FIELD_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error(transparent)]
    Http(#[from] HttpClientError),
    #[error("page {page} is not an object or array; cannot locate a result array")]
    NoArrayFound { page: u32 },
    /// `partial` carries every item collected up to the point the limit was
    /// hit, so a caller can still land it on the response before surfacing
    /// the error (spec §4.4 boundary: data through `max_pages` is not lost).
    #[error("pagination limit of {max_pages} pages reached")]
    PaginationLimit { max_pages: u32, partial: Vec<Value> },
}

/// Identifies one fetch step's pagination cache entry — stable across the
/// many times that step runs (e.g. once per `for`-loop iteration) within a
/// single mission process, which is what makes the TTL meaningful.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub action: String,
    pub step_index: usize,
}

struct CachedField {
    field: Option<String>,
    detected_at: Instant,
}

/// Shared across every `Paginator` instance in a mission run; owned by
/// [`crate::executor::context::MissionContext`].
#[derive(Default)]
pub struct ArrayFieldCache {
    entries: Mutex<FxHashMap<CacheKey, CachedField>>,
}

impl ArrayFieldCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &CacheKey) -> Option<Option<String>> {
        let guard = self.entries.lock();
        let entry = guard.get(key)?;
        if entry.detected_at.elapsed() > ARRAY_FIELD_CACHE_TTL {
            return None;
        }
        Some(entry.field.clone())
    }

    fn set(&self, key: CacheKey, field: Option<String>) {
        self.entries.lock().insert(key, CachedField { field, detected_at: Instant::now() });
    }
}

/// Locates the result array in a page: an explicit `arrayField`, else the
/// first array-valued field of a root object, else the root itself when it
/// is already an array. Caches the discovered field name per `cache_key`
/// and re-detects (overwriting the cache, never erroring) when a later
/// response doesn't match the cached shape.
fn detect_array(
    page: &Value,
    spec: &PaginationSpec,
    cache: &ArrayFieldCache,
    cache_key: &CacheKey,
) -> Result<Vec<Value>, PaginationError> {
    if let Some(field) = &spec.array_field {
        return page
            .get_field(field)
            .and_then(Value::as_array)
            .map(<[Value]>::to_vec)
            .ok_or(PaginationError::NoArrayFound { page: 0 });
    }

    if let Value::List(items) = page {
        return Ok(items.clone());
    }

    if let Some(cached) = cache.get(cache_key) {
        if let Some(field) = &cached {
            if let Some(arr) = page.get_field(field).and_then(Value::as_array) {
                return Ok(arr.to_vec());
            }
            // Shape changed; fall through to re-detect.
        }
    }

    let Some(obj) = page.as_object() else {
        return Err(PaginationError::NoArrayFound { page: 0 });
    };
    for (field, value) in obj {
        if let Value::List(items) = value {
            cache.set(cache_key.clone(), Some(field.clone()));
            return Ok(items.clone());
        }
    }
    cache.set(cache_key.clone(), None);
    Err(PaginationError::NoArrayFound { page: 0 })
}

enum Cursor {
    Offset(u32),
    Page(u32),
    Cursor(Option<String>),
}

impl Cursor {
    fn initial(kind: PaginationKind) -> Self {
        match kind {
            PaginationKind::Offset => Cursor::Offset(0),
            PaginationKind::Page => Cursor::Page(1),
            PaginationKind::Cursor => Cursor::Cursor(None),
        }
    }

    fn query_param(&self, param: &str, page_size: u32) -> Vec<(String, Value)> {
        match self {
            Cursor::Offset(n) => vec![(param.to_string(), Value::Int(i64::from(*n))), ("limit".to_string(), Value::Int(i64::from(page_size)))],
            Cursor::Page(n) => vec![(param.to_string(), Value::Int(i64::from(*n))), ("per_page".to_string(), Value::Int(i64::from(page_size)))],
            Cursor::Cursor(Some(token)) => vec![(param.to_string(), Value::String(token.clone()))],
            Cursor::Cursor(None) => Vec::new(),
        }
    }

    fn advance(self, page_size: u32, next_path: Option<&str>, page_body: &Value) -> (Self, bool) {
        match self {
            Cursor::Offset(n) => (Cursor::Offset(n + page_size), false),
            Cursor::Page(n) => (Cursor::Page(n + 1), false),
            Cursor::Cursor(_) => {
                let next = next_path.and_then(|path| page_body.get_path(path)).and_then(Value::as_str).map(str::to_string);
                let exhausted = next.is_none();
                (Cursor::Cursor(next), exhausted)
            }
        }
    }
}

pub struct Paginator {
    http: Arc<HttpClient>,
    cache: Arc<ArrayFieldCache>,
}

impl Paginator {
    #[must_use]
    pub fn new(http: Arc<HttpClient>, cache: Arc<ArrayFieldCache>) -> Self {
        Self { http, cache }
    }

    /// Collects every page's array into one concatenated `Vec`, stopping at
    /// the strategy's natural termination, `until`, or `MAX_PAGES`
    /// (whichever comes first). `until` is evaluated against the raw page
    /// body by the caller (the fetch step handler owns expression
    /// evaluation; this module stays evaluator-agnostic).
    pub async fn fetch_all(
        &self,
        base_request: HttpRequest,
        spec: &PaginationSpec,
        cache_key: CacheKey,
        cancel: &CancellationToken,
        mut until: impl FnMut(&Value) -> bool,
    ) -> Result<Vec<Value>, PaginationError> {
        let mut cursor = Cursor::initial(spec.kind);
        let mut collected = Vec::new();

        for page_num in 0..spec.max_pages {
            let mut request = base_request.clone();
            request.query.extend(cursor.query_param(&spec.param, spec.page_size));

            let response = self.http.execute(request, cancel).await?;
            let items = detect_array(&response.body, spec, &self.cache, &cache_key)
                .map_err(|_| PaginationError::NoArrayFound { page: page_num })?;

            let natural_stop = match spec.kind {
                PaginationKind::Offset | PaginationKind::Page => items.is_empty(),
                PaginationKind::Cursor => false,
            };
            let predicate_stop = until(&response.body);
            collected.extend(items);

            let (next_cursor, cursor_exhausted) =
                cursor.advance(spec.page_size, spec.next_path.as_deref(), &response.body);
            cursor = next_cursor;

            if natural_stop || predicate_stop || cursor_exhausted {
                return Ok(collected);
            }
        }

        Err(PaginationError::PaginationLimit { max_pages: spec.max_pages, partial: collected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::collections::ValueMap;

    fn page_with_array(field: &str, items: Vec<i64>) -> Value {
        let mut map = ValueMap::default();
        map.insert(field.to_string(), Value::List(items.into_iter().map(Value::Int).collect()));
        Value::Object(map)
    }

    #[test]
    fn detects_explicit_array_field() {
        let cache = ArrayFieldCache::new();
        let key = CacheKey { action: "a".into(), step_index: 0 };
        let spec = PaginationSpec {
            kind: PaginationKind::Offset,
            param: "offset".into(),
            page_size: 10,
            next_path: None,
            array_field: Some("items".into()),
            until: None,
            max_pages: 100,
        };
        let page = page_with_array("items", vec![1, 2, 3]);
        let found = detect_array(&page, &spec, &cache, &key).unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn caches_detected_field_and_reuses_it() {
        let cache = ArrayFieldCache::new();
        let key = CacheKey { action: "a".into(), step_index: 0 };
        let spec = PaginationSpec {
            kind: PaginationKind::Offset,
            param: "offset".into(),
            page_size: 10,
            next_path: None,
            array_field: None,
            until: None,
            max_pages: 100,
        };
        let page1 = page_with_array("results", vec![1]);
        detect_array(&page1, &spec, &cache, &key).unwrap();
        assert_eq!(cache.get(&key), Some(Some("results".to_string())));

        let page2 = page_with_array("results", vec![2, 3]);
        let found = detect_array(&page2, &spec, &cache, &key).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn root_array_is_used_directly() {
        let cache = ArrayFieldCache::new();
        let key = CacheKey { action: "a".into(), step_index: 0 };
        let spec = PaginationSpec {
            kind: PaginationKind::Page,
            param: "page".into(),
            page_size: 10,
            next_path: None,
            array_field: None,
            until: None,
            max_pages: 100,
        };
        let page = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(detect_array(&page, &spec, &cache, &key).unwrap().len(), 2);
    }

    #[test]
    fn cursor_advance_stops_when_next_path_missing() {
        let cursor = Cursor::Cursor(Some("abc".into()));
        let body = Value::Null;
        let (_next, exhausted) = cursor.advance(10, Some("next_cursor"), &body);
        assert!(exhausted);
    }

    #[tokio::test]
    async fn limit_reached_returns_the_pages_collected_so_far() {
        use crate::http::auth::NoAuth;
        use crate::program::{HttpMethod, PaginationKind};
        use crate::resilience::{CircuitBreaker, RateLimiter};
        use httpmock::Method::GET;
        use httpmock::MockServer;

        let server = MockServer::start_async().await;
        for offset in [0, 2] {
            let body: Vec<serde_json::Value> = vec![serde_json::json!({ "id": offset })];
            server
                .mock_async(move |when, then| {
                    when.method(GET).path("/records").query_param("offset", offset.to_string());
                    then.status(200).json_body(serde_json::json!(body));
                })
                .await;
        }

        let http = Arc::new(HttpClient::new(
            "api",
            server.base_url(),
            reqwest::Client::new(),
            Arc::new(NoAuth),
            Arc::new(RateLimiter::new(None)),
            Arc::new(CircuitBreaker::new(None)),
            crate::program::RateLimitPolicyConfig::default(),
            crate::program::CircuitBreakerConfig::default(),
        ));
        let paginator = Paginator::new(http, Arc::new(ArrayFieldCache::new()));
        let spec = PaginationSpec {
            kind: PaginationKind::Offset,
            param: "offset".into(),
            page_size: 2,
            next_path: None,
            array_field: None,
            until: None,
            max_pages: 2,
        };
        let request = HttpRequest::new(HttpMethod::Get, "/records".to_string());
        let key = CacheKey { action: "a".into(), step_index: 0 };

        let err = paginator
            .fetch_all(request, &spec, key, &CancellationToken::new(), |_| false)
            .await
            .expect_err("two non-empty pages exhaust max_pages without a natural stop");

        match err {
            PaginationError::PaginationLimit { max_pages, partial } => {
                assert_eq!(max_pages, 2);
                assert_eq!(partial.len(), 2, "both fetched pages' records must not be discarded");
            }
            other => panic!("expected PaginationLimit, got {other:?}"),
        }
    }
}

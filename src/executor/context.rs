//! Execution context: the process-wide [`MissionContext`] and the
//! per-action, lexically-scoped [`ActionContext`] (spec §3).
//!
//! Grounded on the `VersionedState`/`NodePartial` split: `MissionContext`
//! plays the role of the process-wide, read-only-after-setup shared state
//! (stores, sources, schemas, transforms), while `ActionContext` plays the
//! role of a single node's working set (variables, response) — except here
//! the scoping is an explicit parent chain rather than channel merge at a
//! barrier, since actions within a stage do not share mutable state.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::event_bus::EventEmitter;
use crate::executor::persistence::SyncCheckpointStore;
use crate::http::client::HttpClient;
use crate::pagination::ArrayFieldCache;
use crate::program::{AuthKind, ExpressionEvaluator, Program, SchemaDef, SourceDef, StoreDef, TransformDef};
use crate::stores::StoreAdapter;
use crate::utils::collections::ValueMap;
use crate::value::Value;
use crate::webhook::WebhookSource;

/// Shared, process-wide state for a single mission run. Built once at
/// setup and handed to every action as an `Arc`; nothing here is mutated
/// once the run starts.
pub struct MissionContext {
    pub run_id: String,
    pub program: Arc<Program>,
    pub stores: FxHashMap<String, Arc<dyn StoreAdapter>>,
    pub http_clients: FxHashMap<String, Arc<HttpClient>>,
    pub credentials: Credentials,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub emitter: Option<Arc<dyn EventEmitter>>,
    pub pagination_cache: Arc<ArrayFieldCache>,
    pub checkpoints: Arc<dyn SyncCheckpointStore>,
    pub webhooks: Arc<dyn WebhookSource>,
}

impl MissionContext {
    #[must_use]
    pub fn source_def(&self, name: &str) -> Option<&SourceDef> {
        self.program.sources.get(name)
    }

    #[must_use]
    pub fn store_def(&self, name: &str) -> Option<&StoreDef> {
        self.program.stores.get(name)
    }

    #[must_use]
    pub fn schema_def(&self, name: &str) -> Option<&SchemaDef> {
        self.program.schemas.get(name)
    }

    #[must_use]
    pub fn transform_def(&self, name: &str) -> Option<&TransformDef> {
        self.program.transforms.get(name)
    }

    #[must_use]
    pub fn store(&self, name: &str) -> Option<&Arc<dyn StoreAdapter>> {
        self.stores.get(name)
    }

    #[must_use]
    pub fn http_client(&self, source: &str) -> Option<&Arc<HttpClient>> {
        self.http_clients.get(source)
    }

    /// The lone declared source, when a fetch step omits `source` and the
    /// program leaves no ambiguity about which one it means.
    #[must_use]
    pub fn sole_source(&self) -> Option<&str> {
        let mut iter = self.program.sources.keys();
        let first = iter.next()?;
        if iter.next().is_some() {
            None
        } else {
            Some(first.as_str())
        }
    }
}

/// Resolved source credentials, loaded once at setup from the credentials
/// file plus `REQON_{SOURCE}_{FIELD}` environment overrides (spec §6).
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    fields: FxHashMap<String, FxHashMap<String, String>>,
}

impl Credentials {
    #[must_use]
    pub fn new(fields: FxHashMap<String, FxHashMap<String, String>>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn get(&self, source: &str, field: &str) -> Option<&str> {
        self.fields.get(source)?.get(field).map(String::as_str)
    }

    /// Layers `REQON_{SOURCE}_{FIELD}` environment overrides (spec §6) on top
    /// of a caller-supplied base (typically loaded from a credentials file,
    /// which stays an external concern — this crate only owns the env tier),
    /// then expands `$VAR`, `${VAR}`, and `${VAR:-default}` environment
    /// references embedded inside every field's value. Only the field names
    /// a source's declared [`AuthKind`] actually needs are consulted for the
    /// override tier, so unrelated env vars never leak into the bag.
    #[must_use]
    pub fn resolve(program: &Program, base: Credentials) -> Self {
        let mut fields = base.fields;
        for (name, source) in &program.sources {
            for field in auth_field_names(source.auth) {
                let env_key = format!("REQON_{}_{}", name.to_ascii_uppercase(), field.to_ascii_uppercase());
                if let Ok(value) = std::env::var(&env_key) {
                    fields.entry(name.clone()).or_default().insert((*field).to_string(), value);
                }
            }
        }
        for values in fields.values_mut() {
            for value in values.values_mut() {
                *value = interpolate_env(value);
            }
        }
        Self { fields }
    }
}

/// Expands `$VAR`, `${VAR}`, and `${VAR:-default}` references to process
/// environment variables inside a single credential value. An unset
/// variable with no default expands to the empty string, same as ordinary
/// shell substitution. A lone `$` not starting a valid reference (e.g.
/// followed by whitespace or punctuation) is passed through verbatim.
fn interpolate_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut default = None;
                let mut default_buf = String::new();
                let mut in_default = false;
                loop {
                    match chars.next() {
                        Some('}') | None => break,
                        Some(':') if !in_default && chars.peek() == Some(&'-') => {
                            chars.next();
                            in_default = true;
                        }
                        Some(ch) if in_default => default_buf.push(ch),
                        Some(ch) => name.push(ch),
                    }
                }
                if in_default {
                    default = Some(default_buf);
                }
                out.push_str(&std::env::var(&name).ok().or(default).unwrap_or_default());
            }
            Some(c2) if c2.is_ascii_alphabetic() || c2 == '_' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}

fn auth_field_names(kind: AuthKind) -> &'static [&'static str] {
    match kind {
        AuthKind::None => &[],
        AuthKind::Bearer => &["token"],
        AuthKind::ApiKey => &["header_name", "api_key"],
        AuthKind::Basic => &["username", "password"],
        AuthKind::OAuth2 => &["token_url", "client_id", "client_secret", "access_token", "refresh_token"],
    }
}

/// The per-action working set: variables bound by `let`/`for`/`fetch`, the
/// response register steps read from by default, and a lexical parent for
/// name resolution into enclosing scopes (spec §9: variable shadows store
/// shadows response field on name collision).
#[derive(Clone, Debug, Default)]
pub struct ActionContext {
    pub action: String,
    variables: ValueMap,
    pub response: Option<Value>,
    parent: Option<Arc<ActionContext>>,
}

impl ActionContext {
    #[must_use]
    pub fn root(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            variables: ValueMap::default(),
            response: None,
            parent: None,
        }
    }

    /// Opens a child scope (e.g. a `for` loop body iteration) that can see
    /// the parent's bindings but whose own bindings don't leak back up.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Self {
        Self {
            action: self.action.clone(),
            variables: ValueMap::default(),
            response: self.response.clone(),
            parent: Some(Arc::clone(self)),
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn set_response(&mut self, value: Value) {
        self.response = Some(value);
    }

    /// Looks up a variable by walking the lexical parent chain outward.
    /// Does not consult stores or the response register — callers resolve
    /// the full variable → store → response precedence (spec §9) at the
    /// expression-evaluator boundary, using this only for the variable tier.
    #[must_use]
    pub fn lookup_variable(&self, name: &str) -> Option<&Value> {
        if let Some(v) = self.variables.get(name) {
            return Some(v);
        }
        self.parent.as_ref().and_then(|p| p.lookup_variable(name))
    }

    #[must_use]
    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_scope_sees_parent_bindings_but_not_vice_versa() {
        let mut root = ActionContext::root("demo");
        root.bind("x", Value::Int(1));
        let root = Arc::new(root);
        let mut child = root.child();
        child.bind("y", Value::Int(2));

        assert_eq!(child.lookup_variable("x"), Some(&Value::Int(1)));
        assert_eq!(child.lookup_variable("y"), Some(&Value::Int(2)));
        assert_eq!(root.lookup_variable("y"), None);
    }

    #[test]
    fn inner_binding_shadows_outer() {
        let mut root = ActionContext::root("demo");
        root.bind("x", Value::Int(1));
        let root = Arc::new(root);
        let mut child = root.child();
        child.bind("x", Value::Int(99));

        assert_eq!(child.lookup_variable("x"), Some(&Value::Int(99)));
    }

    #[test]
    fn interpolate_env_expands_bare_and_braced_forms() {
        std::env::set_var("REQON_TEST_TOKEN_INTERP", "shhh");
        assert_eq!(interpolate_env("Bearer $REQON_TEST_TOKEN_INTERP"), "Bearer shhh");
        assert_eq!(interpolate_env("Bearer ${REQON_TEST_TOKEN_INTERP}"), "Bearer shhh");
        std::env::remove_var("REQON_TEST_TOKEN_INTERP");
    }

    #[test]
    fn interpolate_env_falls_back_to_default_when_unset() {
        std::env::remove_var("REQON_TEST_MISSING_INTERP");
        assert_eq!(interpolate_env("${REQON_TEST_MISSING_INTERP:-fallback}"), "fallback");
        assert_eq!(interpolate_env("$REQON_TEST_MISSING_INTERP"), "");
    }

    #[test]
    fn interpolate_env_leaves_plain_text_untouched() {
        assert_eq!(interpolate_env("no env refs here"), "no env refs here");
    }

    #[test]
    fn resolve_interpolates_values_from_the_base_credentials_map() {
        std::env::set_var("REQON_TEST_RESOLVE_INTERP", "expanded");
        let mut base_fields = FxHashMap::default();
        let mut api = FxHashMap::default();
        api.insert("token".to_string(), "prefix-${REQON_TEST_RESOLVE_INTERP}-suffix".to_string());
        base_fields.insert("api".to_string(), api);

        let program = Program {
            name: "demo".to_string(),
            sources: FxHashMap::default(),
            stores: FxHashMap::default(),
            schemas: FxHashMap::default(),
            transforms: FxHashMap::default(),
            actions: FxHashMap::default(),
            pipeline: crate::program::Pipeline { stages: Vec::new() },
        };
        let resolved = Credentials::resolve(&program, Credentials::new(base_fields));
        assert_eq!(resolved.get("api", "token"), Some("prefix-expanded-suffix"));
        std::env::remove_var("REQON_TEST_RESOLVE_INTERP");
    }
}

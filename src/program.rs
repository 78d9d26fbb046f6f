//! The `Program` AST: this crate's external input boundary.
//!
//! The DSL lexer/parser and expression evaluator are external collaborators
//! (spec §1, §6). This module only defines the shapes they hand to the
//! executor — plain serde-derived structs/enums, exactly as `GraphBuilder`
//! hands `App` already-built `Node` impls and edges rather than parsing a
//! DSL itself. Expressions are kept opaque (`Expr`, a boxed parser AST
//! value) and are only ever evaluated through the `ExpressionEvaluator`
//! boundary trait — this crate never interprets them itself.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::executor::context::ActionContext;

/// An opaque, already-parsed expression AST node. The concrete grammar is
/// owned by the external parser; this crate only threads it through to
/// [`ExpressionEvaluator`].
pub type Expr = Json;

/// Boundary contract for the expression language (spec §6). Pure modulo
/// `env()`, which reads process environment.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        expr: &Expr,
        ctx: &ActionContext,
        current: Option<&crate::value::Value>,
    ) -> Result<crate::value::Value, ExprError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("unresolved identifier: {0}")]
    UnresolvedIdentifier(String),
    #[error("expression evaluation failed: {0}")]
    Other(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub sources: FxHashMap<String, SourceDef>,
    pub stores: FxHashMap<String, StoreDef>,
    pub schemas: FxHashMap<String, SchemaDef>,
    pub transforms: FxHashMap<String, TransformDef>,
    pub actions: FxHashMap<String, ActionDef>,
    pub pipeline: Pipeline,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    None,
    Bearer,
    OAuth2,
    ApiKey,
    Basic,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitPolicyConfig {
    #[serde(default)]
    pub strategy: RateLimitStrategy,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_fallback_rpm")]
    pub fallback_rpm: u32,
    /// How often `onWaiting` fires while the `pause` strategy sleeps out a
    /// depletion window (spec §4.2.1).
    #[serde(default = "default_waiting_signal_interval_secs")]
    pub waiting_signal_interval_secs: u64,
}

fn default_max_wait_secs() -> u64 {
    300
}
fn default_fallback_rpm() -> u32 {
    60
}
fn default_waiting_signal_interval_secs() -> u64 {
    5
}

impl Default for RateLimitPolicyConfig {
    fn default() -> Self {
        Self {
            strategy: RateLimitStrategy::default(),
            max_wait_secs: default_max_wait_secs(),
            fallback_rpm: default_fallback_rpm(),
            waiting_signal_interval_secs: default_waiting_signal_interval_secs(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStrategy {
    #[default]
    Pause,
    Throttle,
    Fail,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_window_ms")]
    pub rolling_window_ms: u64,
    #[serde(default = "default_failure_statuses")]
    pub failure_status_codes: Vec<u16>,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_success_threshold() -> u32 {
    2
}
fn default_window_ms() -> u64 {
    60_000
}
fn default_failure_statuses() -> Vec<u16> {
    (500..=599).collect()
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            success_threshold: default_success_threshold(),
            rolling_window_ms: default_window_ms(),
            failure_status_codes: default_failure_statuses(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceDef {
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthKind,
    #[serde(default)]
    pub rate_limit: RateLimitPolicyConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for AuthKind {
    fn default() -> Self {
        AuthKind::None
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
    Sql,
    NoSql,
    Postgrest,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreDef {
    pub backend: StoreBackend,
    pub collection: String,
}

/// `Array` and `Object` carry an optional nested shape so schema matching can
/// recurse structurally instead of checking only the value's outer tag
/// (spec §4.6: "nested field types are checked structurally"). A bare
/// `array`/`object` with no nested shape still matches on tag alone, same as
/// before.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Int,
    Decimal,
    Boolean,
    Null,
    Array {
        #[serde(default)]
        items: Option<Box<FieldType>>,
    },
    Object {
        #[serde(default)]
        fields: Vec<SchemaField>,
    },
    Date,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub ty: FieldType,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// The wildcard schema name `_` matches any value.
pub const WILDCARD_SCHEMA: &str = "_";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaDef {
    pub name: String,
    pub fields: Vec<SchemaField>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransformVariant {
    /// `None` behaves like the wildcard schema — matches any input.
    #[serde(default)]
    pub source_schema: Option<String>,
    #[serde(default)]
    pub guard: Option<Expr>,
    pub mappings: FxHashMap<String, Expr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransformDef {
    pub name: String,
    pub variants: Vec<TransformVariant>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: String,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageSpec {
    pub actions: Vec<String>,
    #[serde(default)]
    pub guard: Option<Expr>,
}

impl StageSpec {
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.actions.len() > 1
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Pipeline {
    pub stages: Vec<StageSpec>,
}

// ---- Step kinds (spec §4.5) -------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaginationKind {
    Offset,
    Page,
    Cursor,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaginationSpec {
    pub kind: PaginationKind,
    pub param: String,
    pub page_size: u32,
    #[serde(default)]
    pub next_path: Option<String>,
    #[serde(default)]
    pub array_field: Option<String>,
    #[serde(default)]
    pub until: Option<Expr>,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_max_pages() -> u32 {
    100
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinceFormat {
    #[default]
    Iso,
    Unix,
    UnixMs,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SinceSpec {
    #[serde(default = "default_since_param")]
    pub param: String,
    #[serde(default)]
    pub format: SinceFormat,
}

fn default_since_param() -> String {
    "since".to_string()
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Exponential,
    Linear,
    Constant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for BackoffKind {
    fn default() -> Self {
        BackoffKind::Exponential
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffKind::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchStep {
    #[serde(default)]
    pub source: Option<String>,
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub query: Vec<(String, Expr)>,
    #[serde(default)]
    pub headers: Vec<(String, Expr)>,
    #[serde(default)]
    pub body: Option<Expr>,
    #[serde(default)]
    pub paginate: Option<PaginationSpec>,
    #[serde(default)]
    pub since: Option<SinceSpec>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForStep {
    pub collection: CollectionRef,
    #[serde(default)]
    pub r#where: Option<Expr>,
    pub var: String,
    pub body: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CollectionRef {
    Store { name: String },
    Value { expr: Expr },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapStep {
    pub fields: FxHashMap<String, Expr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApplyStep {
    pub transform: String,
    #[serde(default)]
    pub bind: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assumption {
    pub name: String,
    pub constraint: Expr,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Error
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidateStep {
    pub assumptions: Vec<Assumption>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreStep {
    pub store: String,
    #[serde(default)]
    pub key: Option<Expr>,
    #[serde(default)]
    pub partial: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "lowercase")]
pub enum FlowDirective {
    Continue,
    Skip,
    Abort {
        #[serde(default)]
        message: Option<String>,
    },
    Retry {
        #[serde(default)]
        backoff: Option<RetryPolicy>,
    },
    Jump {
        target: String,
        #[serde(default)]
        then: JumpThen,
    },
    Queue {
        #[serde(default)]
        target: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JumpThen {
    #[default]
    Continue,
    Retry,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchArm {
    pub schema: String,
    #[serde(default)]
    pub guard: Option<Expr>,
    #[serde(default)]
    pub directive: Option<FlowDirective>,
    #[serde(default)]
    pub body: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchStep {
    #[serde(default)]
    pub target: Option<Expr>,
    pub arms: Vec<MatchArm>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LetStep {
    pub name: String,
    pub expr: Expr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WaitStep {
    pub path: String,
    pub timeout_ms: u64,
    #[serde(default = "default_expected_count")]
    pub expected_count: u32,
    #[serde(default)]
    pub filter: Option<Expr>,
    #[serde(default)]
    pub stream_to: Option<String>,
    #[serde(default)]
    pub stream_key: Option<Expr>,
    #[serde(default)]
    pub retry_on_timeout: Option<RetryPolicy>,
}

fn default_expected_count() -> u32 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
pub enum Step {
    Fetch(FetchStep),
    For(ForStep),
    Map(MapStep),
    Apply(ApplyStep),
    Validate(ValidateStep),
    Store(StoreStep),
    Match(MatchStep),
    Let(LetStep),
    Wait(WaitStep),
}

impl Step {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Step::Fetch(_) => "fetch",
            Step::For(_) => "for",
            Step::Map(_) => "map",
            Step::Apply(_) => "apply",
            Step::Validate(_) => "validate",
            Step::Store(_) => "store",
            Step::Match(_) => "match",
            Step::Let(_) => "let",
            Step::Wait(_) => "wait",
        }
    }
}

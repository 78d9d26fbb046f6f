//! Scenario: a `for` body's `match` step issues a `Skip` directive for some
//! items. A skip must only abandon that one iteration, not the whole loop.

mod common;

use std::sync::Arc;

use httpmock::Method::GET;
use httpmock::MockServer;
use reqon::executor::context::{Credentials, MissionContext};
use reqon::executor::persistence::{ExecutionState, NullExecutionStateStore, NullSyncCheckpointStore};
use reqon::executor::{MissionRunner, MissionStatus};
use reqon::http::auth::NoAuth;
use reqon::http::client::HttpClient;
use reqon::pagination::ArrayFieldCache;
use reqon::program::{
    ActionDef, CircuitBreakerConfig, CollectionRef, FetchStep, FlowDirective, ForStep, HttpMethod, MapStep, MatchArm,
    MatchStep, Pipeline, Program, RateLimitPolicyConfig, RateLimitStrategy, StageSpec, Step, StoreBackend, StoreDef,
    StoreStep, WILDCARD_SCHEMA,
};
use reqon::resilience::{CircuitBreaker, RateLimiter};
use reqon::stores::memory::MemoryStore;
use reqon::stores::StoreAdapter;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use common::{eq, get as get_expr, lit, var};

#[tokio::test]
async fn skip_abandons_only_the_current_iteration() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/users");
            then.status(200).json_body(serde_json::json!([
                { "id": 1, "name": "ada", "skip": false },
                { "id": 2, "name": "grace", "skip": true },
                { "id": 3, "name": "margaret", "skip": false },
            ]));
        })
        .await;

    let http = HttpClient::new(
        "api",
        server.base_url(),
        reqwest::Client::new(),
        Arc::new(NoAuth),
        Arc::new(RateLimiter::new(None)),
        Arc::new(CircuitBreaker::new(None)),
        RateLimitPolicyConfig { strategy: RateLimitStrategy::Pause, ..Default::default() },
        CircuitBreakerConfig::default(),
    );

    let items_store = Arc::new(MemoryStore::new());
    let mut stores: FxHashMap<String, Arc<dyn StoreAdapter>> = FxHashMap::default();
    stores.insert("items".to_string(), items_store.clone());
    let mut store_defs = FxHashMap::default();
    store_defs.insert("items".to_string(), StoreDef { backend: StoreBackend::Memory, collection: "items".to_string() });

    let mut http_clients = FxHashMap::default();
    http_clients.insert("api".to_string(), Arc::new(http));
    let mut source_defs = FxHashMap::default();
    source_defs.insert(
        "api".to_string(),
        reqon::program::SourceDef {
            base_url: server.base_url(),
            auth: reqon::program::AuthKind::None,
            rate_limit: RateLimitPolicyConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        },
    );

    let fetch_step = Step::Fetch(FetchStep {
        source: Some("api".to_string()),
        method: HttpMethod::Get,
        path: "/users".to_string(),
        query: Vec::new(),
        headers: Vec::new(),
        body: None,
        paginate: None,
        since: None,
        retry: None,
    });

    let skip_if_flagged = MatchArm {
        schema: WILDCARD_SCHEMA.to_string(),
        guard: Some(eq(get_expr(var("item"), "skip"), lit(serde_json::json!(true)))),
        directive: Some(FlowDirective::Skip),
        body: Vec::new(),
    };
    let otherwise = MatchArm { schema: WILDCARD_SCHEMA.to_string(), guard: None, directive: None, body: Vec::new() };

    let for_step = Step::For(ForStep {
        collection: CollectionRef::Value { expr: common::current() },
        r#where: None,
        var: "item".to_string(),
        body: vec![
            Step::Match(MatchStep { target: Some(var("item")), arms: vec![skip_if_flagged, otherwise] }),
            Step::Map(MapStep {
                fields: FxHashMap::from_iter([
                    ("id".to_string(), get_expr(var("item"), "id")),
                    ("name".to_string(), get_expr(var("item"), "name")),
                ]),
            }),
            Step::Store(StoreStep { store: "items".to_string(), key: Some(get_expr(var("item"), "id")), partial: false }),
        ],
    });

    let mut actions = FxHashMap::default();
    actions.insert("Fetch".to_string(), ActionDef { name: "Fetch".to_string(), steps: vec![fetch_step, for_step] });

    let program = Arc::new(Program {
        name: "for-skip".to_string(),
        sources: source_defs,
        stores: store_defs,
        schemas: FxHashMap::default(),
        transforms: FxHashMap::default(),
        actions,
        pipeline: Pipeline { stages: vec![StageSpec { actions: vec!["Fetch".to_string()], guard: None }] },
    });

    let context = Arc::new(MissionContext {
        run_id: "run-1".to_string(),
        program: program.clone(),
        stores,
        http_clients,
        credentials: Credentials::default(),
        evaluator: common::evaluator(),
        emitter: None,
        pagination_cache: Arc::new(ArrayFieldCache::new()),
        checkpoints: Arc::new(NullSyncCheckpointStore),
        webhooks: Arc::new(reqon::webhook::ChannelWebhookSource::new()),
    });

    let runner = MissionRunner::new(context, Arc::new(NullExecutionStateStore), CancellationToken::new(), 4);
    let state = ExecutionState::new(program.name.clone(), "run-1".to_string(), &["stage-0".to_string()]);
    let result = runner.run(state).await;

    assert_eq!(result.status, MissionStatus::Completed, "errors: {:?}", result.errors);

    let stored = items_store.list(None).await.expect("list");
    assert_eq!(stored.len(), 2, "the skipped item must not reach the store, but the loop must keep going");
    assert!(items_store.get("1").await.expect("get").is_some());
    assert!(items_store.get("2").await.expect("get").is_none(), "id 2 was flagged skip and must be absent");
    assert!(items_store.get("3").await.expect("get").is_some(), "the loop must continue past the skipped iteration");
}

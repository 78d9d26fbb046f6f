//! Scenario: a `match` step recognizes a rate-limited response shape and
//! issues a `retry` flow directive; the action re-runs until a third
//! attempt sees a response that no longer needs retrying.

mod common;

use std::sync::Arc;

use reqon::executor::context::{Credentials, MissionContext};
use reqon::executor::persistence::{ExecutionState, NullExecutionStateStore, NullSyncCheckpointStore};
use reqon::executor::{MissionRunner, MissionStatus};
use reqon::pagination::ArrayFieldCache;
use reqon::program::{
    ActionDef, BackoffKind, CollectionRef, FieldType, FlowDirective, ForStep, MapStep, MatchArm, MatchStep, Pipeline, Program,
    RetryPolicy, SchemaDef, SchemaField, StageSpec, Step, StoreBackend, StoreDef, StoreStep, WILDCARD_SCHEMA,
};
use reqon::stores::memory::MemoryStore;
use reqon::stores::StoreAdapter;
use reqon::value::Value;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use common::{eq, field, get, lit, lt};

#[tokio::test]
async fn match_step_retries_until_the_response_no_longer_needs_it() {
    let counter_store = Arc::new(MemoryStore::new());
    counter_store.set("count", Value::from_json(serde_json::json!({ "n": 0 }))).await.expect("seed counter");

    let mut stores: FxHashMap<String, Arc<dyn StoreAdapter>> = FxHashMap::default();
    stores.insert("counter".to_string(), counter_store.clone());
    let mut store_defs = FxHashMap::default();
    store_defs.insert("counter".to_string(), StoreDef { backend: StoreBackend::Memory, collection: "counter".to_string() });

    let mut schemas = FxHashMap::default();
    schemas.insert(
        "rate_limited".to_string(),
        SchemaDef {
            name: "rate_limited".to_string(),
            fields: vec![SchemaField { name: "retry_needed".to_string(), ty: FieldType::Boolean, required: true }],
        },
    );

    let read_counter = Step::For(ForStep {
        collection: CollectionRef::Store { name: "counter".to_string() },
        r#where: None,
        var: "row".to_string(),
        body: vec![Step::Map(MapStep {
            fields: FxHashMap::from_iter([
                ("n".to_string(), get(common::var("row"), "n")),
                ("retry_needed".to_string(), lt(get(common::var("row"), "n"), lit(serde_json::json!(2)))),
            ]),
        })],
    });

    let match_step = Step::Match(MatchStep {
        target: None,
        arms: vec![
            MatchArm {
                schema: "rate_limited".to_string(),
                guard: Some(eq(field("retry_needed"), lit(serde_json::json!(true)))),
                directive: Some(FlowDirective::Retry {
                    backoff: Some(RetryPolicy { max_attempts: 3, backoff: BackoffKind::Exponential, initial_delay_ms: 10, max_delay_ms: 100 }),
                }),
                body: vec![
                    Step::Map(MapStep { fields: FxHashMap::from_iter([("n".to_string(), common::add(field("n"), lit(serde_json::json!(1))))]) }),
                    Step::Store(StoreStep { store: "counter".to_string(), key: Some(lit(serde_json::json!("count"))), partial: false }),
                ],
            },
            MatchArm { schema: WILDCARD_SCHEMA.to_string(), guard: None, directive: None, body: Vec::new() },
        ],
    });

    let mut actions = FxHashMap::default();
    actions.insert("CallFlaky".to_string(), ActionDef { name: "CallFlaky".to_string(), steps: vec![read_counter, match_step] });

    let program = Arc::new(Program {
        name: "match-retry".to_string(),
        sources: FxHashMap::default(),
        stores: store_defs,
        schemas,
        transforms: FxHashMap::default(),
        actions,
        pipeline: Pipeline { stages: vec![StageSpec { actions: vec!["CallFlaky".to_string()], guard: None }] },
    });

    let context = Arc::new(MissionContext {
        run_id: "run-1".to_string(),
        program: program.clone(),
        stores,
        http_clients: FxHashMap::default(),
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

    let final_count = counter_store.get("count").await.expect("get").expect("seeded");
    assert_eq!(final_count.get_field("n").unwrap(), &Value::Int(2), "two retries should land the counter on the third attempt's value");
}

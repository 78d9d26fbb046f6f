//! Mission setup (spec §4.6 step 1): resolves credentials, opens one
//! [`HttpClient`] per declared source and one adapter per declared store,
//! and decides whether this run resumes a prior [`ExecutionState`] before
//! handing a ready [`MissionRunner`] back to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::event_bus::EventEmitter;
use crate::executor::context::{Credentials, MissionContext};
use crate::executor::mission::MissionRunner;
use crate::executor::persistence::{
    ExecutionState, ExecutionStateStore, FileExecutionStateStore, FileSyncCheckpointStore, NullExecutionStateStore,
    NullSyncCheckpointStore, PersistenceError, SyncCheckpointStore,
};
use crate::http::auth::{build_auth_provider, AuthError};
use crate::http::client::HttpClient;
use crate::pagination::ArrayFieldCache;
use crate::program::{ExpressionEvaluator, Program};
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::stores::{create_store, StoreConfig, StoreError};
use crate::utils::id_generator::IdGenerator;
use crate::webhook::{ChannelWebhookSource, WebhookSource};

#[derive(Debug, Error)]
pub enum MissionSetupError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Everything a caller needs to decide before a run starts, distinct from
/// the program/DSL itself: where state lives, which backends to use, and
/// whether to pick up where a prior run left off.
pub struct SetupConfig {
    pub data_dir: PathBuf,
    pub dev_mode: bool,
    pub sql_url: Option<String>,
    pub postgrest_url: Option<String>,
    pub base_credentials: Credentials,
    pub resume: bool,
    pub persist_state: bool,
    pub concurrency_limit: usize,
    pub emitter: Option<Arc<dyn EventEmitter>>,
    pub webhooks: Option<Arc<dyn WebhookSource>>,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            dev_mode: true,
            sql_url: None,
            postgrest_url: None,
            base_credentials: Credentials::default(),
            resume: false,
            persist_state: true,
            concurrency_limit: 8,
            emitter: None,
            webhooks: None,
        }
    }
}

/// Builds the shared [`MissionContext`] and a ready [`MissionRunner`],
/// returning the [`ExecutionState`] the runner should start (or resume)
/// from. Credential resolution, per-source HTTP clients with their own
/// rate limiter and circuit breaker, and per-store adapters are all built
/// here so that nothing in [`MissionRunner::run`] can fail on a missing
/// dependency.
pub async fn setup(
    program: Arc<Program>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    config: SetupConfig,
) -> Result<(MissionRunner, ExecutionState), MissionSetupError> {
    let credentials = Credentials::resolve(&program, config.base_credentials);

    let execution_states: Arc<dyn ExecutionStateStore> = if config.persist_state {
        Arc::new(FileExecutionStateStore::create(&config.data_dir).await?)
    } else {
        Arc::new(NullExecutionStateStore)
    };

    let resumed = if config.resume { execution_states.load_latest(&program.name).await } else { None };
    let run_id = resumed.as_ref().map_or_else(|| IdGenerator::new().generate_run_id(), |s| s.run_id.clone());

    let checkpoints: Arc<dyn SyncCheckpointStore> = if config.persist_state {
        Arc::new(FileSyncCheckpointStore::create(&config.data_dir, &program.name).await?)
    } else {
        Arc::new(NullSyncCheckpointStore)
    };

    let mut http_clients = FxHashMap::default();
    for (name, source_def) in &program.sources {
        let http = reqwest::Client::new();
        let auth = build_auth_provider(source_def.auth, name, &credentials, http.clone())?;
        let client = HttpClient::new(
            name.clone(),
            source_def.base_url.clone(),
            http,
            auth,
            Arc::new(RateLimiter::new(config.emitter.clone())),
            Arc::new(CircuitBreaker::new(config.emitter.clone())),
            source_def.rate_limit.clone(),
            source_def.circuit_breaker.clone(),
        );
        http_clients.insert(name.clone(), Arc::new(client));
    }

    let store_config = StoreConfig {
        data_dir: config.data_dir.clone(),
        dev_mode: config.dev_mode,
        sql_url: config.sql_url.clone(),
        postgrest_url: config.postgrest_url.clone(),
    };
    let mut stores = FxHashMap::default();
    for (name, store_def) in &program.stores {
        let store = create_store(name, store_def, &store_config).await?;
        stores.insert(name.clone(), store);
    }

    let webhooks = config.webhooks.unwrap_or_else(|| Arc::new(ChannelWebhookSource::new()));

    let stage_names: Vec<String> = (0..program.pipeline.stages.len()).map(|i| format!("stage-{i}")).collect();
    let state = resumed.unwrap_or_else(|| ExecutionState::new(program.name.clone(), run_id.clone(), &stage_names));

    let context = Arc::new(MissionContext {
        run_id,
        program,
        stores,
        http_clients,
        credentials,
        evaluator,
        emitter: config.emitter,
        pagination_cache: Arc::new(ArrayFieldCache::new()),
        checkpoints,
        webhooks,
    });

    let runner = MissionRunner::new(context, execution_states, CancellationToken::new(), config.concurrency_limit);
    Ok((runner, state))
}

//! # reqon: execution runtime for a declarative data-synchronization DSL
//!
//! reqon runs already-parsed sync programs: a pipeline of stages, each a
//! set of named actions, each action a sequence of steps (`fetch`, `for`,
//! `map`, `apply`, `validate`, `store`, `match`, `let`, `wait`) that move
//! data between HTTP sources and pluggable stores. Parsing the DSL itself
//! is out of scope here — this crate accepts a [`program::Program`] as a
//! plain, already-built value and concerns itself with running it
//! correctly: resilient HTTP, bounded concurrency, checkpointed resume,
//! and a typed event bus for observing a run as it happens.
//!
//! ## Core concepts
//!
//! - **Program**: the static AST — sources, stores, schemas, transforms,
//!   actions, and the pipeline that sequences them ([`program`]).
//! - **Mission executor**: runs a program's pipeline stage by stage,
//!   fanning an individual stage's actions out concurrently, folding each
//!   action's flow signals into the run's control flow ([`executor`]).
//! - **Steps**: the nine step kinds an action's body is built from, each
//!   with its own handler module under [`steps`].
//! - **HTTP client**: per-source client wrapping `reqwest` with auth,
//!   retry/backoff, rate limiting, and circuit breaking ([`http`],
//!   [`resilience`]).
//! - **Pagination**: collects a multi-page fetch into one result set
//!   ([`pagination`]).
//! - **Stores**: a uniform `StoreAdapter` trait behind pluggable
//!   in-memory, file, SQL, and PostgREST backends ([`stores`]).
//! - **Event bus**: a typed, dotted-tag event stream covering every
//!   mission/stage/step/fetch/loop/data/webhook/resilience transition
//!   ([`event_bus`]).
//! - **Errors**: a cause-chain error type and scoped error events shared
//!   by every layer ([`channels`]).
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqon::executor::setup::{setup, SetupConfig};
//! use reqon::program::{ExpressionEvaluator, Program};
//!
//! # struct MyEvaluator;
//! # impl ExpressionEvaluator for MyEvaluator {
//! #     fn evaluate(
//! #         &self,
//! #         _expr: &reqon::program::Expr,
//! #         _ctx: &reqon::executor::ActionContext,
//! #         _current: Option<&reqon::value::Value>,
//! #     ) -> Result<reqon::value::Value, reqon::program::ExprError> {
//! #         unimplemented!()
//! #     }
//! # }
//! # async fn run(program: Program) -> Result<(), Box<dyn std::error::Error>> {
//! let (runner, state) = setup(Arc::new(program), Arc::new(MyEvaluator), SetupConfig::default()).await?;
//! let result = runner.run(state).await;
//! assert!(result.is_success() || !result.errors.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`program`] - the parsed DSL's AST types and the `ExpressionEvaluator` seam
//! - [`value`] - the dynamic `Value` used for every piece of data in flight
//! - [`executor`] - context scoping, persistence, scheduling, setup, and the run loop
//! - [`steps`] - one handler module per step kind, dispatched by `steps::run_steps`
//! - [`http`] - the resilient per-source HTTP client and auth providers
//! - [`resilience`] - rate limiter and circuit breaker state shared by the HTTP client
//! - [`pagination`] - the multi-page fetch engine
//! - [`stores`] - the `StoreAdapter` trait and its backends
//! - [`event_bus`] - the typed event stream and its sinks
//! - [`channels`] - the cause-chain error type and scoped error events
//! - [`webhook`] - the inbound webhook delivery source `wait` steps block on
//! - [`telemetry`] - human-readable rendering for events and error chains
//! - [`utils`] - small cross-cutting helpers

pub mod channels;
pub mod event_bus;
pub mod executor;
pub mod http;
pub mod pagination;
pub mod program;
pub mod resilience;
pub mod steps;
pub mod stores;
pub mod telemetry;
pub mod utils;
pub mod value;
pub mod webhook;

//! The mission executor (spec §4.6): context scoping, persistence,
//! bounded concurrent scheduling, setup, and the run loop itself.

pub mod context;
pub mod mission;
pub mod persistence;
pub mod scheduler;
pub mod setup;

pub use context::{ActionContext, Credentials, MissionContext};
pub use mission::{ActionError, ExecutionResult, MissionRunner, MissionStatus};
pub use persistence::{ExecutionState, ExecutionStateStore, SyncCheckpoint, SyncCheckpointStore};
pub use scheduler::{Scheduler, StageReport};
pub use setup::{setup, MissionSetupError, SetupConfig};

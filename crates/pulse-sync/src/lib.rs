//! Sync orchestration: keeps the local store in step with the
//! upstream marketing platform, on a schedule and on demand, using
//! incremental watermarks.

pub mod orchestrator;
pub mod scheduler;
pub mod transform;

pub use orchestrator::{
    EntitySyncOutcome, SyncConfig, SyncOptions, SyncOrchestrator, SyncReport,
};
pub use scheduler::{ScheduleConfig, SyncScheduler};

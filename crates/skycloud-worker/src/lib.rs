//! Skycloud Worker Library
//!
//! Background lifecycle management: a scheduler for named recurring sweeps and the
//! thumbnail worker pool they feed.

pub mod pool;
pub mod scheduler;
pub mod tasks;

pub use pool::{SubmitOutcome, ThumbnailCompletion, ThumbnailJob, ThumbnailPool};
pub use scheduler::{LifecycleScheduler, SchedulerHandle, TaskHandler, TaskState, TaskStats, TickOutcome};
pub use tasks::{
    register_lifecycle_tasks, ExpirySweep, LifecycleContext, MaxViewsSweep, MetricsSnapshotTask,
    PartialSweep, ThumbnailFeeder,
};

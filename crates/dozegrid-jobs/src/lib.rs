//! dozegrid-jobs — job templates and the jobs worker.
//!
//! Producers submit job requests against named templates; the service
//! checks and completes them and pushes them onto the template's queue.
//! On the leader, the worker pops queued requests into free parallel
//! slots and starts them through a `JobRuntime`.
//!
//! # Architecture
//!
//! - **`config`** — `JobsConfig` / `JobTemplate`, always holding `Default`
//! - **`resources`** — caps requested resources at the template's
//! - **`runtime`** — `JobRuntime`, `ReplicaSource`, `ActivityTracker` + in-memory impls
//! - **`service`** — `JobService`, admission and enqueue
//! - **`worker`** — `JobsWorker`, the leader-only dispatch loop

pub mod config;
pub mod error;
pub mod resources;
pub mod runtime;
pub mod service;
pub mod worker;

pub use config::{CreateJob, EnvVar, JobResources, JobTemplate, JobsConfig, Visibility, DEFAULT_JOB};
pub use error::{JobError, JobResult};
pub use resources::{parse_quantity, validate_resources};
pub use runtime::{
    ActivityTracker, InMemoryActivity, InMemoryJobRuntime, InMemoryReplicas, Job, JobRuntime,
    JobStatus, ReplicaSource, JOB_NAME_MARKER,
};
pub use service::{EnqueueOutcome, JobService, ERROR_IMAGE_NOT_ALLOWED, ERROR_VISIBILITY_PRIVATE};
pub use worker::{CycleReport, JobsWorker, DEFAULT_WORKER_INTERVAL};

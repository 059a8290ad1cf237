//! Error types for the job system.

use dozegrid_queue::QueueError;
use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The job runtime refused or failed to act.
    #[error("job runtime error: {0}")]
    Runtime(String),

    #[error("invalid job configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

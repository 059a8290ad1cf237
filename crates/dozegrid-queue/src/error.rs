//! Error types for the DozeGrid job queue.

use thiserror::Error;

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while submitting, logging, or replaying commands.
///
/// Item-level processing failures are never errors: they travel as outcome
/// codes through an acknowledge command.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open command log: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// The command was rejected before reaching the log.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The persisted log cannot be replayed. The replica must not serve.
    #[error("command log corrupt: {0}")]
    Corrupt(String),

    #[error("cannot commit position {requested}: last appended position is {last}")]
    CommitBeyondLog { requested: u64, last: u64 },

    #[error("this replica is not the leader (leader: {leader:?})")]
    NotLeader { leader: Option<u64> },

    #[error("replication error: {0}")]
    Replication(String),
}

impl QueueError {
    /// Whether resubmitting the same command may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Transaction(_)
                | QueueError::Table(_)
                | QueueError::Read(_)
                | QueueError::Write(_)
                | QueueError::NotLeader { .. }
                | QueueError::Replication(_)
        )
    }
}

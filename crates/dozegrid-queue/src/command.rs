//! The command set: the only way to mutate or query queue state.
//!
//! Mutating commands are the unit of replication. Each one touches exactly
//! one queue key and carries every input `apply` needs, including the
//! timestamp used for deadline and backoff decisions.
//!
//! On disk and on the wire a command is a tagged record:
//!
//! ```text
//! {"type":"pop","body":{"key":"Job:resize","count":2,"now_ms":1700000000000}}
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};
use crate::types::*;

/// A replicated, state-mutating queue operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Command {
    /// Append a new available item at the write end of `key`.
    Push {
        key: QueueKey,
        payload: Vec<u8>,
        policy: RetryPolicy,
    },
    /// Deliver up to `count` eligible items from the read end of `key`.
    Pop {
        key: QueueKey,
        count: u32,
        now_ms: TimestampMs,
    },
    /// Resolve delivered items from their outcome codes.
    Acknowledge {
        key: QueueKey,
        now_ms: TimestampMs,
        results: Vec<ItemResult>,
    },
}

impl Command {
    pub fn key(&self) -> &str {
        match self {
            Command::Push { key, .. } | Command::Pop { key, .. } | Command::Acknowledge { key, .. } => key,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Push { .. } => "push",
            Command::Pop { .. } => "pop",
            Command::Acknowledge { .. } => "acknowledge",
        }
    }

    /// Reject malformed commands before they reach the log.
    pub fn validate(&self) -> QueueResult<()> {
        if self.key().trim().is_empty() {
            return Err(QueueError::InvalidCommand(format!(
                "{}: queue key must not be empty",
                self.kind()
            )));
        }

        match self {
            Command::Push { policy, .. } => {
                if policy.visibility_timeout_seconds == 0 {
                    return Err(QueueError::InvalidCommand(
                        "push: visibility timeout must be positive".to_string(),
                    ));
                }
            }
            Command::Pop { count, .. } => {
                if *count == 0 {
                    return Err(QueueError::InvalidCommand(
                        "pop: count must be positive".to_string(),
                    ));
                }
            }
            Command::Acknowledge { results, .. } => {
                if results.is_empty() {
                    return Err(QueueError::InvalidCommand(
                        "acknowledge: results must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Encode as a log record.
    pub fn encode(&self) -> QueueResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| QueueError::Serialize(e.to_string()))
    }

    /// Decode a log record.
    pub fn decode(bytes: &[u8]) -> QueueResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| QueueError::Deserialize(e.to_string()))
    }
}

/// The result of applying one command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandOutput {
    Pushed { id: ItemId },
    Popped { items: Vec<DequeuedItem> },
    Acknowledged { resolutions: Vec<(ItemId, Resolution)> },
}

impl CommandOutput {
    pub fn into_pushed(self) -> QueueResult<ItemId> {
        match self {
            CommandOutput::Pushed { id } => Ok(id),
            other => Err(unexpected("pushed", &other)),
        }
    }

    pub fn into_popped(self) -> QueueResult<Vec<DequeuedItem>> {
        match self {
            CommandOutput::Popped { items } => Ok(items),
            other => Err(unexpected("popped", &other)),
        }
    }

    pub fn into_acknowledged(self) -> QueueResult<Vec<(ItemId, Resolution)>> {
        match self {
            CommandOutput::Acknowledged { resolutions } => Ok(resolutions),
            other => Err(unexpected("acknowledged", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &CommandOutput) -> QueueError {
    QueueError::Replication(format!("expected {expected} output, got {got:?}"))
}

/// Read-only count over the locally applied state. Never logged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountQuery {
    pub key: QueueKey,
    pub statuses: BTreeSet<CountType>,
    pub maximum: u64,
    pub now_ms: TimestampMs,
}

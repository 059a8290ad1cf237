//! Replicated queue backend.
//!
//! Commands become raft log entries. A write submitted on a follower is
//! forwarded once to the leader's raft router; the leader never forwards
//! again, so a stale leader hint ends in `NotLeader` instead of a loop.

use std::sync::Arc;

use dozegrid_queue::{
    BoxFuture, Command, CommandOutput, CountQuery, QueueBackend, QueueError, QueueResult,
};
use openraft::BasicNode;
use openraft::error::{ClientWriteError, ForwardToLeader, RaftError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::network::{WRITE_PATH, post_json};
use crate::state_machine::SharedQueueState;
use crate::typ::DozeRaft;

/// Reply of a leader to a forwarded write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteReply {
    Applied { output: CommandOutput },
    NotLeader { leader: Option<u64> },
    Rejected { error: String },
}

pub(crate) enum LocalWrite {
    Applied(CommandOutput),
    Forward(ForwardToLeader<u64, BasicNode>),
}

/// Propose a command through this node's raft without forwarding.
pub(crate) async fn write_local(raft: &DozeRaft, command: Command) -> QueueResult<LocalWrite> {
    command.validate()?;
    match raft.client_write(command).await {
        Ok(resp) => resp.data.output.map(LocalWrite::Applied).ok_or_else(|| {
            QueueError::Replication(format!("entry {} applied without output", resp.log_id.index))
        }),
        Err(RaftError::APIError(ClientWriteError::ForwardToLeader(fwd))) => {
            Ok(LocalWrite::Forward(fwd))
        }
        Err(e) => Err(QueueError::Replication(e.to_string())),
    }
}

/// `QueueBackend` backed by a raft group.
#[derive(Clone)]
pub struct RaftBackend {
    raft: Arc<DozeRaft>,
    state: SharedQueueState,
}

impl RaftBackend {
    pub fn new(raft: Arc<DozeRaft>, state: SharedQueueState) -> Self {
        Self { raft, state }
    }

    async fn write(&self, command: Command) -> QueueResult<CommandOutput> {
        let fwd = match write_local(&self.raft, command.clone()).await? {
            LocalWrite::Applied(output) => return Ok(output),
            LocalWrite::Forward(fwd) => fwd,
        };

        let Some(node) = fwd.leader_node else {
            return Err(QueueError::NotLeader {
                leader: fwd.leader_id,
            });
        };

        debug!(leader = ?fwd.leader_id, addr = %node.addr, kind = command.kind(), "forwarding write to leader");
        let reply: WriteReply = post_json(&node.addr, WRITE_PATH, &command)
            .await
            .map_err(|e| QueueError::Replication(format!("forward to {}: {e}", node.addr)))?;

        match reply {
            WriteReply::Applied { output } => Ok(output),
            WriteReply::NotLeader { leader } => Err(QueueError::NotLeader { leader }),
            WriteReply::Rejected { error } => Err(QueueError::Replication(error)),
        }
    }
}

impl QueueBackend for RaftBackend {
    fn submit(&self, command: Command) -> BoxFuture<'_, QueueResult<CommandOutput>> {
        Box::pin(self.write(command))
    }

    fn count(&self, query: &CountQuery) -> QueueResult<u64> {
        let state = self
            .state
            .read()
            .map_err(|e| QueueError::Read(e.to_string()))?;
        Ok(state.count(query))
    }
}

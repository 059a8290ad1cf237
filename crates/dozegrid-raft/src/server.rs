//! Raft HTTP server — handles incoming raft RPCs and forwarded writes.
//!
//! Each RPC route deserializes the JSON openraft request, calls the
//! matching method on the local raft, and replies with the JSON-encoded
//! `Result`. Remote raft errors travel in the body; only malformed
//! requests get a non-2xx status.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use dozegrid_queue::{Command, QueueError};
use openraft::error::{InstallSnapshotError, RaftError};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest,
    InstallSnapshotResponse, VoteRequest, VoteResponse,
};
use tracing::{debug, warn};

use crate::backend::{LocalWrite, WriteReply, write_local};
use crate::network::{APPEND_PATH, SNAPSHOT_PATH, VOTE_PATH, WRITE_PATH};
use crate::typ::{DozeRaft, TypeConfig};

/// Router serving this node's raft endpoints.
pub fn raft_router(raft: Arc<DozeRaft>) -> Router {
    Router::new()
        .route(APPEND_PATH, post(append_entries))
        .route(VOTE_PATH, post(vote))
        .route(SNAPSHOT_PATH, post(install_snapshot))
        .route(WRITE_PATH, post(forwarded_write))
        .with_state(raft)
}

async fn append_entries(
    State(raft): State<Arc<DozeRaft>>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> Json<Result<AppendEntriesResponse<u64>, RaftError<u64>>> {
    debug!(
        vote = ?req.vote,
        entries = req.entries.len(),
        "handling append_entries RPC"
    );
    Json(raft.append_entries(req).await)
}

async fn vote(
    State(raft): State<Arc<DozeRaft>>,
    Json(req): Json<VoteRequest<u64>>,
) -> Json<Result<VoteResponse<u64>, RaftError<u64>>> {
    debug!(vote = ?req.vote, "handling vote RPC");
    Json(raft.vote(req).await)
}

async fn install_snapshot(
    State(raft): State<Arc<DozeRaft>>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Json<Result<InstallSnapshotResponse<u64>, RaftError<u64, InstallSnapshotError>>> {
    debug!(
        snapshot_id = %req.meta.snapshot_id,
        offset = req.offset,
        done = req.done,
        "handling install_snapshot RPC"
    );
    Json(raft.install_snapshot(req).await)
}

async fn forwarded_write(
    State(raft): State<Arc<DozeRaft>>,
    Json(command): Json<Command>,
) -> Json<WriteReply> {
    let kind = command.kind();
    let reply = match write_local(&raft, command).await {
        Ok(LocalWrite::Applied(output)) => WriteReply::Applied { output },
        Ok(LocalWrite::Forward(fwd)) => WriteReply::NotLeader {
            leader: fwd.leader_id,
        },
        Err(QueueError::NotLeader { leader }) => WriteReply::NotLeader { leader },
        Err(e) => {
            warn!(kind, error = %e, "forwarded write rejected");
            WriteReply::Rejected {
                error: e.to_string(),
            }
        }
    };
    Json(reply)
}

//! One raft replica of the queue: storage, raft instance, and the handles
//! the rest of the daemon needs from it.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use openraft::BasicNode;
use redb::Database;
use tracing::info;

use crate::backend::RaftBackend;
use crate::leadership::RaftLeadership;
use crate::log_store::LogStore;
use crate::network::NetworkFactory;
use crate::server::raft_router;
use crate::state_machine::{SharedQueueState, StateMachine};
use crate::typ::DozeRaft;

pub struct RaftNode {
    id: u64,
    raft: Arc<DozeRaft>,
    state: SharedQueueState,
}

impl RaftNode {
    /// Start a replica over `db`. Log, vote, and snapshots share the file.
    pub async fn start(id: u64, db: Arc<Database>, config: openraft::Config) -> anyhow::Result<Self> {
        let config = Arc::new(config.validate()?);
        let log_store = LogStore::new(Arc::clone(&db))?;
        let state_machine = StateMachine::new(db)?;
        let state = state_machine.state();

        let raft = openraft::Raft::new(id, config, NetworkFactory, log_store, state_machine).await?;
        info!(raft_id = id, "raft instance created");

        Ok(Self {
            id,
            raft: Arc::new(raft),
            state,
        })
    }

    /// Initialize a fresh cluster with `members`. A no-op on a node that
    /// already holds membership.
    pub async fn bootstrap(&self, members: BTreeMap<u64, BasicNode>) {
        let ids: Vec<u64> = members.keys().copied().collect();
        match self.raft.initialize(members).await {
            Ok(()) => info!(?ids, "raft cluster initialized"),
            // NotAllowed means already initialized, expected on restart.
            Err(e) => info!(error = %e, "raft initialize skipped"),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn raft(&self) -> Arc<DozeRaft> {
        Arc::clone(&self.raft)
    }

    pub fn state(&self) -> SharedQueueState {
        Arc::clone(&self.state)
    }

    pub fn backend(&self) -> RaftBackend {
        RaftBackend::new(self.raft(), self.state())
    }

    pub fn leadership(&self) -> RaftLeadership {
        RaftLeadership::new(self.id, self.raft())
    }

    pub fn router(&self) -> Router {
        raft_router(self.raft())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.raft.shutdown().await?;
        info!(raft_id = self.id, "raft stopped");
        Ok(())
    }
}

//! Raft state machine over the in-memory queue state.
//!
//! Committed entries are applied to a shared [`QueueState`]. The state
//! itself is not written on every apply: the raft log already holds every
//! committed command, and a restarted replica re-applies the committed
//! suffix on top of its last snapshot. Snapshots are persisted to redb so
//! that suffix stays short once the log is purged.

use std::io::Cursor;
use std::sync::{Arc, RwLock};

use dozegrid_queue::QueueState;
use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine};
use openraft::{
    BasicNode, Entry, EntryPayload, LogId, Snapshot, SnapshotMeta, StorageError, StoredMembership,
};
use redb::{Database, ReadableDatabase, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::log_store::{read_err, write_err};
use crate::typ::{Response, TypeConfig};

const RAFT_SNAPSHOT: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_snapshot");
const CURRENT_KEY: &str = "current";

/// Queue state shared between the state machine and readers.
pub type SharedQueueState = Arc<RwLock<QueueState>>;

#[derive(Serialize, Deserialize)]
struct StoredSnapshot {
    meta: SnapshotMeta<u64, BasicNode>,
    data: Vec<u8>,
}

pub struct StateMachine {
    db: Arc<Database>,
    state: SharedQueueState,
    last_applied: Option<LogId<u64>>,
    membership: StoredMembership<u64, BasicNode>,
}

/// Captures the state at the moment a snapshot is requested.
pub struct SmSnapshotBuilder {
    db: Arc<Database>,
    state: QueueState,
    last_applied: Option<LogId<u64>>,
    membership: StoredMembership<u64, BasicNode>,
}

impl StateMachine {
    /// Create a state machine over a shared database, restoring the last
    /// persisted snapshot if there is one.
    pub fn new(db: Arc<Database>) -> Result<Self, StorageError<u64>> {
        let txn = db.begin_write().map_err(write_err)?;
        txn.open_table(RAFT_SNAPSHOT).map_err(write_err)?;
        txn.commit().map_err(write_err)?;

        let mut sm = Self {
            db,
            state: SharedQueueState::default(),
            last_applied: None,
            membership: StoredMembership::default(),
        };

        if let Some(stored) = load_snapshot(&sm.db)? {
            let restored = QueueState::from_bytes(&stored.data).map_err(read_err)?;
            info!(
                snapshot_id = %stored.meta.snapshot_id,
                items = restored.len(),
                "restored queue state from snapshot"
            );
            sm.state = Arc::new(RwLock::new(restored));
            sm.last_applied = stored.meta.last_log_id;
            sm.membership = stored.meta.last_membership;
        }
        Ok(sm)
    }

    /// Handle for reading the applied queue state.
    pub fn state(&self) -> SharedQueueState {
        Arc::clone(&self.state)
    }
}

fn load_snapshot(db: &Database) -> Result<Option<StoredSnapshot>, StorageError<u64>> {
    let txn = db.begin_read().map_err(read_err)?;
    let table = txn.open_table(RAFT_SNAPSHOT).map_err(read_err)?;
    match table.get(CURRENT_KEY).map_err(read_err)? {
        Some(val) => Ok(Some(serde_json::from_slice(val.value()).map_err(read_err)?)),
        None => Ok(None),
    }
}

fn save_snapshot(db: &Database, stored: &StoredSnapshot) -> Result<(), StorageError<u64>> {
    let data = serde_json::to_vec(stored).map_err(write_err)?;
    let txn = db.begin_write().map_err(write_err)?;
    {
        let mut table = txn.open_table(RAFT_SNAPSHOT).map_err(write_err)?;
        table.insert(CURRENT_KEY, data.as_slice()).map_err(write_err)?;
    }
    txn.commit().map_err(write_err)?;
    Ok(())
}

impl RaftStateMachine<TypeConfig> for StateMachine {
    type SnapshotBuilder = SmSnapshotBuilder;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<u64>>, StoredMembership<u64, BasicNode>), StorageError<u64>> {
        Ok((self.last_applied, self.membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<Response>, StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        let mut responses = Vec::new();
        let mut state = self.state.write().map_err(write_err)?;

        for entry in entries {
            self.last_applied = Some(entry.log_id);

            let output = match entry.payload {
                EntryPayload::Blank => None,
                EntryPayload::Normal(command) => Some(state.apply(&command)),
                EntryPayload::Membership(membership) => {
                    self.membership = StoredMembership::new(Some(entry.log_id), membership);
                    None
                }
            };
            responses.push(Response { output });
        }

        debug!(
            applied = responses.len(),
            last_applied = ?self.last_applied.map(|l| l.index),
            "applied raft entries"
        );
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        // A poisoned lock still holds the last fully applied batch.
        let state = match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        SmSnapshotBuilder {
            db: Arc::clone(&self.db),
            state,
            last_applied: self.last_applied,
            membership: self.membership.clone(),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<u64>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<u64, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<u64>> {
        let data = snapshot.into_inner();
        let restored = QueueState::from_bytes(&data).map_err(read_err)?;

        save_snapshot(
            &self.db,
            &StoredSnapshot {
                meta: meta.clone(),
                data,
            },
        )?;

        *self.state.write().map_err(write_err)? = restored;
        self.last_applied = meta.last_log_id;
        self.membership = meta.last_membership.clone();

        info!(snapshot_id = %meta.snapshot_id, "installed snapshot");
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<u64>> {
        Ok(load_snapshot(&self.db)?.map(|stored| Snapshot {
            meta: stored.meta,
            snapshot: Box::new(Cursor::new(stored.data)),
        }))
    }
}

impl RaftSnapshotBuilder<TypeConfig> for SmSnapshotBuilder {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<u64>> {
        let data = self.state.to_bytes().map_err(write_err)?;

        let meta = SnapshotMeta {
            last_log_id: self.last_applied,
            last_membership: self.membership.clone(),
            snapshot_id: format!("snap-{}", self.last_applied.map_or(0, |l| l.index)),
        };

        save_snapshot(
            &self.db,
            &StoredSnapshot {
                meta: meta.clone(),
                data: data.clone(),
            },
        )?;
        info!(snapshot_id = %meta.snapshot_id, bytes = data.len(), "built snapshot");

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

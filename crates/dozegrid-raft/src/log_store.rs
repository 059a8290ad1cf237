//! Raft log storage backed by redb.
//!
//! Entries are JSON records keyed by log index. The vote, the committed
//! log id, and the last purged log id live in a small metadata table so a
//! restarted replica can re-apply everything it had committed.

use std::fmt::Debug;
use std::ops::RangeBounds;
use std::sync::Arc;

use openraft::storage::{LogFlushed, LogState, RaftLogReader, RaftLogStorage};
use openraft::{Entry, ErrorSubject, ErrorVerb, LogId, StorageError, Vote};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::typ::TypeConfig;

const RAFT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_log");
const RAFT_META: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_meta");

const VOTE_KEY: &str = "vote";
const COMMITTED_KEY: &str = "committed";
const LAST_PURGED_KEY: &str = "last_purged";

pub(crate) fn read_err(e: impl std::fmt::Display) -> StorageError<u64> {
    StorageError::from_io_error(
        ErrorSubject::Store,
        ErrorVerb::Read,
        std::io::Error::other(e.to_string()),
    )
}

pub(crate) fn write_err(e: impl std::fmt::Display) -> StorageError<u64> {
    StorageError::from_io_error(
        ErrorSubject::Store,
        ErrorVerb::Write,
        std::io::Error::other(e.to_string()),
    )
}

/// Raft log storage backed by redb.
pub struct LogStore {
    db: Arc<Database>,
}

/// Read-only view handed to replication tasks.
pub struct LogReader {
    db: Arc<Database>,
}

impl LogStore {
    /// Create a log store over a shared database, creating its tables.
    pub fn new(db: Arc<Database>) -> Result<Self, StorageError<u64>> {
        let txn = db.begin_write().map_err(write_err)?;
        txn.open_table(RAFT_LOG).map_err(write_err)?;
        txn.open_table(RAFT_META).map_err(write_err)?;
        txn.commit().map_err(write_err)?;
        Ok(Self { db })
    }

    fn put_meta<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError<u64>> {
        let data = serde_json::to_vec(value).map_err(write_err)?;
        let txn = self.db.begin_write().map_err(write_err)?;
        {
            let mut table = txn.open_table(RAFT_META).map_err(write_err)?;
            table.insert(key, data.as_slice()).map_err(write_err)?;
        }
        txn.commit().map_err(write_err)?;
        Ok(())
    }

    fn get_meta<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError<u64>> {
        let txn = self.db.begin_read().map_err(read_err)?;
        let table = txn.open_table(RAFT_META).map_err(read_err)?;
        match table.get(key).map_err(read_err)? {
            Some(val) => Ok(Some(serde_json::from_slice(val.value()).map_err(read_err)?)),
            None => Ok(None),
        }
    }
}

/// Delete every log record whose index falls in `range`.
fn remove_range(
    txn: &WriteTransaction,
    range: impl RangeBounds<u64>,
) -> Result<usize, StorageError<u64>> {
    let mut table = txn.open_table(RAFT_LOG).map_err(write_err)?;
    let keys: Vec<u64> = table
        .range(range)
        .map_err(write_err)?
        .map(|item| item.map(|(k, _)| k.value()))
        .collect::<Result<_, _>>()
        .map_err(write_err)?;

    for key in &keys {
        table.remove(*key).map_err(write_err)?;
    }
    Ok(keys.len())
}

impl RaftLogReader<TypeConfig> for LogReader {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + Send>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<u64>> {
        let txn = self.db.begin_read().map_err(read_err)?;
        let table = txn.open_table(RAFT_LOG).map_err(read_err)?;

        let entries = table
            .range(range)
            .map_err(read_err)?
            .map(|item| {
                let (_, val) = item.map_err(read_err)?;
                serde_json::from_slice(val.value()).map_err(read_err)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + Send>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<u64>> {
        let mut reader = LogReader {
            db: Arc::clone(&self.db),
        };
        reader.try_get_log_entries(range).await
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = LogReader;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<u64>> {
        let last_purged_log_id: Option<LogId<u64>> = self.get_meta(LAST_PURGED_KEY)?;

        let txn = self.db.begin_read().map_err(read_err)?;
        let table = txn.open_table(RAFT_LOG).map_err(read_err)?;
        let last_log_id = match table.last().map_err(read_err)? {
            Some((_, val)) => {
                let entry: Entry<TypeConfig> =
                    serde_json::from_slice(val.value()).map_err(read_err)?;
                Some(entry.log_id)
            }
            // Everything was purged: the last log id is the purge point.
            None => last_purged_log_id,
        };

        Ok(LogState {
            last_purged_log_id,
            last_log_id,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        LogReader {
            db: Arc::clone(&self.db),
        }
    }

    async fn save_vote(&mut self, vote: &Vote<u64>) -> Result<(), StorageError<u64>> {
        self.put_meta(VOTE_KEY, vote)?;
        debug!(?vote, "saved vote");
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<u64>>, StorageError<u64>> {
        self.get_meta(VOTE_KEY)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        let txn = self.db.begin_write().map_err(write_err)?;
        let mut appended = 0usize;
        {
            let mut table = txn.open_table(RAFT_LOG).map_err(write_err)?;
            for entry in entries {
                let data = serde_json::to_vec(&entry).map_err(write_err)?;
                table
                    .insert(entry.log_id.index, data.as_slice())
                    .map_err(write_err)?;
                appended += 1;
            }
        }
        txn.commit().map_err(write_err)?;

        debug!(appended, "appended raft entries");
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let txn = self.db.begin_write().map_err(write_err)?;
        let removed = remove_range(&txn, log_id.index..)?;
        txn.commit().map_err(write_err)?;
        debug!(index = log_id.index, removed, "truncated raft log");
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let data = serde_json::to_vec(&log_id).map_err(write_err)?;

        // Purge point and deletion commit together.
        let txn = self.db.begin_write().map_err(write_err)?;
        {
            let mut meta = txn.open_table(RAFT_META).map_err(write_err)?;
            meta.insert(LAST_PURGED_KEY, data.as_slice())
                .map_err(write_err)?;
        }
        let removed = remove_range(&txn, ..=log_id.index)?;
        txn.commit().map_err(write_err)?;
        debug!(index = log_id.index, removed, "purged raft log");
        Ok(())
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<u64>>,
    ) -> Result<(), StorageError<u64>> {
        match committed {
            Some(log_id) => self.put_meta(COMMITTED_KEY, &log_id),
            None => Ok(()),
        }
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<u64>>, StorageError<u64>> {
        self.get_meta(COMMITTED_KEY)
    }
}

//! CommandLog — redb-backed write-ahead log for single-node operation.
//!
//! Commands are appended and committed in two explicit steps. Appending
//! persists the record without touching the state machine; committing
//! persists the committed marker and then applies every newly committed
//! record, in log order, exactly once. Opening a log loads the stored
//! snapshot and replays the committed records after it before anything can
//! be read.
//!
//! Every `snapshot_interval` committed records the whole state is written to
//! `command_log_snapshot` and the records it covers are deleted in the same
//! transaction, so the log holds at most one interval of history.
//!
//! Writers are serialized by one mutex, which fixes the global commit
//! order. Readers share the state machine through an `RwLock`.

use std::ops::RangeBounds;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::{debug, info, warn};

use crate::command::{Command, CommandOutput, CountQuery};
use crate::error::{QueueError, QueueResult};
use crate::state_machine::QueueState;
use crate::tables::*;

/// Committed records between two snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 1024;

/// Convert any `Display` error into a `QueueError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| QueueError::$variant(e.to_string())
    };
}

/// A validated command packaged as a log record, not yet positioned.
#[derive(Debug, Clone)]
pub struct LogEntry {
    command: Command,
    record: Vec<u8>,
}

impl LogEntry {
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// The bytes that will be stored for this entry.
    pub fn record(&self) -> &[u8] {
        &self.record
    }
}

#[derive(Debug, Default)]
struct Cursor {
    last_appended: u64,
    committed: u64,
    /// Position covered by the stored snapshot.
    snapshot: u64,
}

/// Durable command log driving a [`QueueState`].
pub struct CommandLog {
    db: Arc<Database>,
    state: Arc<RwLock<QueueState>>,
    writer: Mutex<Cursor>,
    snapshot_interval: u64,
}

impl CommandLog {
    /// Open (or create) a command log at the given path and replay it.
    pub fn open(path: &Path) -> QueueResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let log = Self::from_database(Arc::new(db))?;
        info!(?path, committed = log.committed_index(), "command log opened");
        Ok(log)
    }

    /// Create an ephemeral in-memory command log (for testing).
    pub fn open_in_memory() -> QueueResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        Self::from_database(Arc::new(db))
    }

    /// Build a log over an existing database, loading the stored snapshot
    /// and replaying the committed records after it.
    pub fn from_database(db: Arc<Database>) -> QueueResult<Self> {
        ensure_tables(&db)?;

        let committed = read_meta(&db, COMMITTED_KEY)?;
        let (snapshot, mut state) = read_snapshot(&db)?;
        if snapshot > committed {
            return Err(QueueError::Corrupt(format!(
                "snapshot at {snapshot} is past committed position {committed}"
            )));
        }
        for (_, command) in read_range(&db, snapshot + 1, committed)? {
            state.apply(&command);
        }

        let last_appended = last_position(&db)?;
        if last_appended > committed {
            warn!(
                committed,
                last_appended, "discarding uncommitted log tail"
            );
            let txn = db.begin_write().map_err(map_err!(Transaction))?;
            remove_range(&txn, committed + 1..)?;
            txn.commit().map_err(map_err!(Transaction))?;
        }

        debug!(snapshot, committed, items = state.len(), "command log replayed");
        Ok(Self {
            db,
            state: Arc::new(RwLock::new(state)),
            writer: Mutex::new(Cursor {
                last_appended: committed,
                committed,
                snapshot,
            }),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        })
    }

    /// Snapshot and purge every `interval` committed records (at least one).
    pub fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval.max(1);
        self
    }

    /// Validate and package a command. Malformed commands never get a
    /// position.
    pub fn create_entry(&self, command: Command) -> QueueResult<LogEntry> {
        command.validate()?;
        let record = command.encode()?;
        Ok(LogEntry { command, record })
    }

    /// Durably append an entry without applying it. Returns its position.
    pub fn append(&self, entry: &LogEntry) -> QueueResult<u64> {
        let mut cursor = self.writer.lock().expect("command log writer lock");
        self.append_locked(&mut cursor, entry)
    }

    /// Commit every appended entry up to `up_to` and apply the newly
    /// committed ones. Returns the output of each applied entry.
    ///
    /// Committing an already-committed position is a no-op.
    pub fn commit(&self, up_to: u64) -> QueueResult<Vec<(u64, CommandOutput)>> {
        let mut cursor = self.writer.lock().expect("command log writer lock");
        self.commit_locked(&mut cursor, up_to)
    }

    /// Append and commit one command, returning its output.
    ///
    /// On failure the command is not applied and may be resubmitted.
    pub fn submit(&self, command: Command) -> QueueResult<CommandOutput> {
        let entry = self.create_entry(command)?;
        let mut cursor = self.writer.lock().expect("command log writer lock");

        let position = self.append_locked(&mut cursor, &entry)?;
        match self.commit_locked(&mut cursor, position) {
            Ok(mut outputs) => outputs
                .pop()
                .filter(|(index, _)| *index == position)
                .map(|(_, output)| output)
                .ok_or_else(|| QueueError::Corrupt(format!("no output for position {position}"))),
            Err(e) => {
                warn!(position, error = %e, "commit failed, dropping appended entry");
                if self.truncate_after(cursor.committed).is_ok() {
                    cursor.last_appended = cursor.committed;
                }
                Err(e)
            }
        }
    }

    fn append_locked(&self, cursor: &mut Cursor, entry: &LogEntry) -> QueueResult<u64> {
        let position = cursor.last_appended + 1;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COMMAND_LOG).map_err(map_err!(Table))?;
            table
                .insert(position, entry.record.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        cursor.last_appended = position;
        debug!(position, kind = entry.command.kind(), key = %entry.command.key(), "entry appended");
        Ok(position)
    }

    fn commit_locked(&self, cursor: &mut Cursor, up_to: u64) -> QueueResult<Vec<(u64, CommandOutput)>> {
        if up_to <= cursor.committed {
            return Ok(Vec::new());
        }
        if up_to > cursor.last_appended {
            return Err(QueueError::CommitBeyondLog {
                requested: up_to,
                last: cursor.last_appended,
            });
        }

        let commands = read_range(&self.db, cursor.committed + 1, up_to)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut meta = txn.open_table(COMMAND_LOG_META).map_err(map_err!(Table))?;
            meta.insert(COMMITTED_KEY, up_to).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        let mut outputs = Vec::with_capacity(commands.len());
        {
            let mut state = self.state.write().expect("queue state lock");
            for (index, command) in commands {
                outputs.push((index, state.apply(&command)));
            }
        }
        cursor.committed = up_to;
        debug!(committed = up_to, applied = outputs.len(), "entries committed");

        if cursor.committed - cursor.snapshot >= self.snapshot_interval {
            // The commit is already durable; a failed snapshot is retried
            // on the next commit.
            if let Err(e) = self.build_snapshot(cursor) {
                warn!(committed = cursor.committed, error = %e, "command log snapshot failed");
            }
        }
        Ok(outputs)
    }

    /// Persist the state at the committed position and purge the records
    /// it covers. Snapshot, position, and deletion commit together.
    fn build_snapshot(&self, cursor: &mut Cursor) -> QueueResult<()> {
        let index = cursor.committed;
        let data = self.state.read().expect("queue state lock").to_bytes()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut snapshots = txn.open_table(COMMAND_LOG_SNAPSHOT).map_err(map_err!(Table))?;
            snapshots
                .insert(SNAPSHOT_KEY, data.as_slice())
                .map_err(map_err!(Write))?;
            let mut meta = txn.open_table(COMMAND_LOG_META).map_err(map_err!(Table))?;
            meta.insert(SNAPSHOT_INDEX_KEY, index).map_err(map_err!(Write))?;
        }
        let removed = remove_range(&txn, ..=index)?;
        txn.commit().map_err(map_err!(Transaction))?;

        cursor.snapshot = index;
        info!(index, removed, bytes = data.len(), "command log snapshot built");
        Ok(())
    }

    fn truncate_after(&self, position: u64) -> QueueResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        remove_range(&txn, position + 1..)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Count over the latest committed state.
    pub fn count(&self, query: &CountQuery) -> u64 {
        self.state.read().expect("queue state lock").count(query)
    }

    /// Run a closure against a stable view of the state machine.
    pub fn read<R>(&self, f: impl FnOnce(&QueueState) -> R) -> R {
        let state = self.state.read().expect("queue state lock");
        f(&state)
    }

    /// Clone of the current state machine contents.
    pub fn snapshot(&self) -> QueueState {
        self.read(QueueState::clone)
    }

    pub fn committed_index(&self) -> u64 {
        self.writer.lock().expect("command log writer lock").committed
    }

    pub fn last_index(&self) -> u64 {
        self.writer.lock().expect("command log writer lock").last_appended
    }

    /// Position covered by the stored snapshot, 0 before the first one.
    pub fn snapshot_index(&self) -> u64 {
        self.writer.lock().expect("command log writer lock").snapshot
    }

    /// Number of records still held in the log table.
    pub fn stored_records(&self) -> QueueResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COMMAND_LOG).map_err(map_err!(Table))?;
        let mut records = 0;
        for item in table.iter().map_err(map_err!(Read))? {
            item.map_err(map_err!(Read))?;
            records += 1;
        }
        Ok(records)
    }
}

fn ensure_tables(db: &Database) -> QueueResult<()> {
    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    txn.open_table(COMMAND_LOG).map_err(map_err!(Table))?;
    txn.open_table(COMMAND_LOG_META).map_err(map_err!(Table))?;
    txn.open_table(COMMAND_LOG_SNAPSHOT).map_err(map_err!(Table))?;
    txn.commit().map_err(map_err!(Transaction))?;
    Ok(())
}

fn read_meta(db: &Database, key: &str) -> QueueResult<u64> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let meta = txn.open_table(COMMAND_LOG_META).map_err(map_err!(Table))?;
    Ok(meta
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0))
}

/// The stored snapshot position and state, or an empty state at 0.
fn read_snapshot(db: &Database) -> QueueResult<(u64, QueueState)> {
    let index = read_meta(db, SNAPSHOT_INDEX_KEY)?;
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let table = txn.open_table(COMMAND_LOG_SNAPSHOT).map_err(map_err!(Table))?;
    match table.get(SNAPSHOT_KEY).map_err(map_err!(Read))? {
        Some(guard) => {
            let state = QueueState::from_bytes(guard.value())
                .map_err(|e| QueueError::Corrupt(format!("snapshot at {index}: {e}")))?;
            Ok((index, state))
        }
        None if index == 0 => Ok((0, QueueState::new())),
        None => Err(QueueError::Corrupt(format!("snapshot at {index} is missing"))),
    }
}

fn last_position(db: &Database) -> QueueResult<u64> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let table = txn.open_table(COMMAND_LOG).map_err(map_err!(Table))?;
    Ok(table
        .last()
        .map_err(map_err!(Read))?
        .map(|(key, _)| key.value())
        .unwrap_or(0))
}

/// Read records `from..=to`, failing on any gap or undecodable record.
fn read_range(db: &Database, from: u64, to: u64) -> QueueResult<Vec<(u64, Command)>> {
    if from > to {
        return Ok(Vec::new());
    }

    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let table = txn.open_table(COMMAND_LOG).map_err(map_err!(Table))?;

    let mut commands = Vec::new();
    let mut expected = from;
    for item in table.range(from..=to).map_err(map_err!(Read))? {
        let (key, value) = item.map_err(map_err!(Read))?;
        let index = key.value();
        if index != expected {
            return Err(QueueError::Corrupt(format!(
                "expected record {expected}, found {index}"
            )));
        }
        let command = Command::decode(value.value())
            .map_err(|e| QueueError::Corrupt(format!("record {index}: {e}")))?;
        commands.push((index, command));
        expected += 1;
    }

    if expected != to + 1 {
        return Err(QueueError::Corrupt(format!(
            "log truncated: expected records up to {to}, last found {}",
            expected - 1
        )));
    }
    Ok(commands)
}

/// Delete every record in `range` inside `txn`. Returns how many went.
fn remove_range(txn: &WriteTransaction, range: impl RangeBounds<u64>) -> QueueResult<usize> {
    let mut table = txn.open_table(COMMAND_LOG).map_err(map_err!(Table))?;
    let keys: Vec<u64> = table
        .range(range)
        .map_err(map_err!(Read))?
        .map(|item| item.map(|(k, _)| k.value()))
        .collect::<Result<_, _>>()
        .map_err(map_err!(Read))?;
    for key in &keys {
        table.remove(*key).map_err(map_err!(Write))?;
    }
    Ok(keys.len())
}

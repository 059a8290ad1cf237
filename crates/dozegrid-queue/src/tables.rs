//! redb table definitions for the local command log.

use redb::TableDefinition;

/// Log records keyed by 1-based position. Values are tagged command JSON.
pub const COMMAND_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("command_log");

/// Log metadata (`committed` position).
pub const COMMAND_LOG_META: TableDefinition<&str, u64> = TableDefinition::new("command_log_meta");

pub const COMMITTED_KEY: &str = "committed";

/// Serialized `QueueState` covering every position up to `SNAPSHOT_INDEX_KEY`.
pub const COMMAND_LOG_SNAPSHOT: TableDefinition<&str, &[u8]> =
    TableDefinition::new("command_log_snapshot");

pub const SNAPSHOT_KEY: &str = "current";

/// Meta key holding the position the stored snapshot covers.
pub const SNAPSHOT_INDEX_KEY: &str = "snapshot";

//! Raft type configuration for DozeGrid.
//!
//! Log entries carry queue [`Command`]s; applying one yields the command's
//! output so the writer gets pushed ids, popped items, or resolutions back.

use std::io::Cursor;

use dozegrid_queue::{Command, CommandOutput};
use openraft::TokioRuntime;

/// Result of applying one log entry.
///
/// Blank and membership entries carry no command and produce no output.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Response {
    pub output: Option<CommandOutput>,
}

openraft::declare_raft_types!(
    /// DozeGrid Raft type configuration.
    pub TypeConfig:
        D = Command,
        R = Response,
        NodeId = u64,
        Node = openraft::BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = TokioRuntime,
);

pub type DozeRaft = openraft::Raft<TypeConfig>;

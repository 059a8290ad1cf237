// openraft's StorageError is large; every storage method returns it.
#![allow(clippy::result_large_err)]

//! DozeGrid Raft replication — openraft + redb under the job queue.
//!
//! Replaces the single-node command log with a raft group: every replica
//! applies the same committed commands to its own `QueueState`, and only
//! the elected leader pops items for delivery.
//!
//! # Architecture
//!
//! - **`typ`** — Type configuration (`TypeConfig`, `Response`)
//! - **`log_store`** — Raft log, vote, and commit marker in redb
//! - **`state_machine`** — Applies committed commands; persists snapshots
//! - **`network`** / **`server`** — Raft RPCs as JSON over HTTP
//! - **`backend`** — `RaftBackend`, the replicated `QueueBackend`
//! - **`leadership`** — `RaftLeadership`, the `LeadershipGate` from raft metrics
//! - **`node`** — `RaftNode`, wiring all of the above for the daemon

pub mod backend;
pub mod leadership;
pub mod log_store;
pub mod network;
pub mod node;
pub mod server;
pub mod state_machine;
pub mod typ;

pub use backend::{RaftBackend, WriteReply};
pub use leadership::RaftLeadership;
pub use log_store::LogStore;
pub use network::{NetworkConnection, NetworkFactory};
pub use node::RaftNode;
pub use server::raft_router;
pub use state_machine::{SharedQueueState, StateMachine};
pub use typ::{DozeRaft, Response, TypeConfig};

//! dozegrid-queue — reliable job queue core for DozeGrid.
//!
//! A write-ahead command log whose committed entries deterministically
//! mutate an in-memory keyed-queue state machine, with at-least-once
//! delivery on top: visibility timeouts, retry backoff, and permanent
//! failure after the retry budget is spent.
//!
//! # Architecture
//!
//! - **`command`** — `Push`/`Pop`/`Acknowledge` commands and the `Count` query
//! - **`state_machine`** — `QueueState`, mutated only by `apply`
//! - **`log_store`** — `CommandLog`, redb-backed append/commit log with snapshots and replay
//! - **`engine`** — `QueueEngine`, namespacing + policy + clock over a `QueueBackend`
//! - **`gate`** — `LeadershipGate`, who may pop for delivery
//!
//! ```text
//! producer ─▶ QueueEngine ─▶ QueueBackend::submit ─▶ append ─▶ commit ─▶ QueueState::apply
//! ```
//!
//! The replicated backend lives in `dozegrid-raft`; this crate has no
//! network code.

pub mod clock;
pub mod command;
pub mod engine;
pub mod error;
pub mod gate;
pub mod log_store;
pub mod state_machine;
pub mod tables;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandOutput, CountQuery};
pub use engine::{BoxFuture, QueueBackend, QueueEngine, DEFAULT_KEY_PREFIX};
pub use error::{QueueError, QueueResult};
pub use gate::{FlagGate, LeadershipGate, StaticGate};
pub use log_store::{CommandLog, LogEntry, DEFAULT_SNAPSHOT_INTERVAL};
pub use state_machine::QueueState;
pub use types::*;

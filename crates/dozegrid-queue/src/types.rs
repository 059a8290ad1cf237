//! Domain types for the job queue.
//!
//! Everything here is JSON-serializable: items live inside the state
//! machine, which is itself serialized for raft snapshots and compared
//! byte-for-byte across replicas.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Queue identifier, e.g. `Job:resize-images`.
pub type QueueKey = String;

/// Opaque item identifier assigned when a push is applied.
pub type ItemId = String;

/// Milliseconds since the unix epoch. Carried inside commands.
pub type TimestampMs = u64;

// ── Retry policy ───────────────────────────────────────────────────

/// Delivery policy attached to each item at push time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before each retry. The length bounds the number of retries;
    /// an empty list means a single delivery attempt.
    pub backoff_seconds: Vec<u64>,
    /// How long a pending item may stay unacknowledged before it is
    /// recycled by the next pop.
    pub visibility_timeout_seconds: u64,
    /// Outcome codes that schedule a retry. Any other non-2xx code fails
    /// the item permanently.
    pub retryable_status_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_seconds: vec![2, 4, 8, 16, 32],
            visibility_timeout_seconds: 120,
            retryable_status_codes: [500, 502, 503].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given delivery attempt (1-based) failed,
    /// or `None` when retries are exhausted.
    pub fn backoff_after(&self, attempt: u32) -> Option<u64> {
        let index = usize::try_from(attempt).ok()?.checked_sub(1)?;
        self.backoff_seconds.get(index).copied()
    }

    pub fn is_retryable(&self, status_code: u16) -> bool {
        self.retryable_status_codes.contains(&status_code)
    }

    pub fn visibility_timeout_ms(&self) -> u64 {
        self.visibility_timeout_seconds.saturating_mul(1000)
    }
}

/// Whether an outcome code reports success (any 2xx).
pub fn is_success(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

// ── Items ──────────────────────────────────────────────────────────

/// Lifecycle status of a queue item.
///
/// `Done` and `Failed` are terminal: an item reaching either is removed
/// from its queue in the same command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    Pending,
    Done,
    Failed,
}

/// Classes an item can be counted under at a given instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CountType {
    /// Poppable now: available and not hidden, or pending past its deadline.
    Available,
    /// Delivered and still inside its visibility timeout.
    Pending,
    /// Available but hidden until its backoff elapses.
    WaitingForRetry,
}

impl std::str::FromStr for CountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(CountType::Available),
            "pending" | "running" => Ok(CountType::Pending),
            "waiting_for_retry" | "waitingforretry" | "retry" => Ok(CountType::WaitingForRetry),
            other => Err(format!("unknown count type: {other}")),
        }
    }
}

/// One unit of queued work, owned by the state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueItem {
    pub id: ItemId,
    pub payload: Vec<u8>,
    pub status: ItemStatus,
    /// Number of `Available → Pending` transitions so far.
    pub attempt: u32,
    /// Set while `Pending`.
    pub pending_deadline: Option<TimestampMs>,
    /// Set while waiting out a retry backoff.
    pub hidden_until: Option<TimestampMs>,
    pub policy: RetryPolicy,
}

impl QueueItem {
    pub fn new(id: ItemId, payload: Vec<u8>, policy: RetryPolicy) -> Self {
        Self {
            id,
            payload,
            status: ItemStatus::Available,
            attempt: 0,
            pending_deadline: None,
            hidden_until: None,
            policy,
        }
    }

    /// Pending with a deadline at or before `now`.
    pub fn is_expired(&self, now: TimestampMs) -> bool {
        self.status == ItemStatus::Pending && self.pending_deadline.is_some_and(|d| d <= now)
    }

    /// Available and not hidden by a backoff at `now`.
    pub fn is_eligible(&self, now: TimestampMs) -> bool {
        self.status == ItemStatus::Available && self.hidden_until.is_none_or(|h| h <= now)
    }

    /// The count class this item falls under at `now`, if any.
    pub fn count_type(&self, now: TimestampMs) -> Option<CountType> {
        match self.status {
            ItemStatus::Available if self.is_eligible(now) => Some(CountType::Available),
            ItemStatus::Available => Some(CountType::WaitingForRetry),
            ItemStatus::Pending if self.is_expired(now) => Some(CountType::Available),
            ItemStatus::Pending => Some(CountType::Pending),
            ItemStatus::Done | ItemStatus::Failed => None,
        }
    }
}

// ── Command payloads ───────────────────────────────────────────────

/// An item handed to a consumer by a pop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DequeuedItem {
    pub id: ItemId,
    pub payload: Vec<u8>,
    pub attempt: u32,
}

/// A consumer's report for one delivered item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemResult {
    pub id: ItemId,
    pub status_code: u16,
}

impl ItemResult {
    pub fn new(id: impl Into<ItemId>, status_code: u16) -> Self {
        Self {
            id: id.into(),
            status_code,
        }
    }
}

/// What an acknowledgment did to one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    /// Succeeded and removed.
    Done,
    /// Back to available, hidden until the given timestamp.
    RetryScheduled { available_at: TimestampMs },
    /// Failed permanently and removed.
    Failed,
    /// Unknown id or not pending; stale or duplicate report.
    Ignored,
}

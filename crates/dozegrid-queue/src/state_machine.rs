//! Queue state machine.
//!
//! Holds every queue as an ordered item sequence and is mutated only by
//! applying committed commands. `apply` is a pure function of the current
//! state and the command: it never reads the wall clock and never draws
//! random numbers, so replicas applying the same committed prefix hold
//! identical state.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{Command, CommandOutput, CountQuery};
use crate::error::{QueueError, QueueResult};
use crate::types::*;

/// In-memory keyed queues. Front of each deque is the read end.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueState {
    queues: BTreeMap<QueueKey, VecDeque<QueueItem>>,
    /// Last item sequence handed out. Ids derive from it.
    last_item_seq: u64,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one committed command.
    pub fn apply(&mut self, command: &Command) -> CommandOutput {
        match command {
            Command::Push { key, payload, policy } => {
                let id = self.push(key, payload.clone(), policy.clone());
                CommandOutput::Pushed { id }
            }
            Command::Pop { key, count, now_ms } => CommandOutput::Popped {
                items: self.pop(key, *count, *now_ms),
            },
            Command::Acknowledge { key, now_ms, results } => CommandOutput::Acknowledged {
                resolutions: self.acknowledge(key, *now_ms, results),
            },
        }
    }

    fn push(&mut self, key: &str, payload: Vec<u8>, policy: RetryPolicy) -> ItemId {
        self.last_item_seq += 1;
        let id = format!("{:020}", self.last_item_seq);
        self.queues
            .entry(key.to_string())
            .or_default()
            .push_back(QueueItem::new(id.clone(), payload, policy));
        debug!(%key, %id, "item pushed");
        id
    }

    fn pop(&mut self, key: &str, count: u32, now: TimestampMs) -> Vec<DequeuedItem> {
        let Some(queue) = self.queues.get_mut(key) else {
            return Vec::new();
        };

        // Deadline sweep: abandoned deliveries become available again.
        let mut recycled = 0usize;
        for item in queue.iter_mut().filter(|i| i.is_expired(now)) {
            item.status = ItemStatus::Available;
            item.pending_deadline = None;
            recycled += 1;
        }

        let limit = usize::try_from(count).unwrap_or(usize::MAX);
        let mut delivered = Vec::new();
        for item in queue.iter_mut() {
            if delivered.len() >= limit {
                break;
            }
            if !item.is_eligible(now) {
                continue;
            }
            item.status = ItemStatus::Pending;
            item.attempt += 1;
            item.hidden_until = None;
            item.pending_deadline = Some(now.saturating_add(item.policy.visibility_timeout_ms()));
            delivered.push(DequeuedItem {
                id: item.id.clone(),
                payload: item.payload.clone(),
                attempt: item.attempt,
            });
        }

        debug!(%key, requested = count, delivered = delivered.len(), recycled, "items popped");
        delivered
    }

    fn acknowledge(
        &mut self,
        key: &str,
        now: TimestampMs,
        results: &[ItemResult],
    ) -> Vec<(ItemId, Resolution)> {
        let Some(queue) = self.queues.get_mut(key) else {
            return results
                .iter()
                .map(|r| (r.id.clone(), Resolution::Ignored))
                .collect();
        };

        let mut resolutions = Vec::with_capacity(results.len());
        for result in results {
            let resolution = match queue.iter().position(|i| i.id == result.id) {
                Some(pos) if queue[pos].status == ItemStatus::Pending => {
                    resolve(queue, pos, result.status_code, now)
                }
                _ => Resolution::Ignored,
            };
            debug!(%key, id = %result.id, status_code = result.status_code, ?resolution, "item acknowledged");
            resolutions.push((result.id.clone(), resolution));
        }

        if queue.is_empty() {
            self.queues.remove(key);
        }
        resolutions
    }

    /// Count items of `key` in any of the requested classes, capped at
    /// `maximum`.
    pub fn count(&self, query: &CountQuery) -> u64 {
        let Some(queue) = self.queues.get(&query.key) else {
            return 0;
        };
        let matching = queue
            .iter()
            .filter_map(|item| item.count_type(query.now_ms))
            .filter(|class| query.statuses.contains(class))
            .count();
        (matching as u64).min(query.maximum)
    }

    /// Items of one queue, read end first.
    pub fn items(&self, key: &str) -> impl Iterator<Item = &QueueItem> {
        self.queues.get(key).into_iter().flatten()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    /// Total number of items across all queues.
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Serialize the whole state (snapshots, replica comparison).
    pub fn to_bytes(&self) -> QueueResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| QueueError::Serialize(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> QueueResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| QueueError::Deserialize(e.to_string()))
    }
}

/// Resolve the pending item at `pos` from its outcome code.
fn resolve(queue: &mut VecDeque<QueueItem>, pos: usize, status_code: u16, now: TimestampMs) -> Resolution {
    let item = &mut queue[pos];

    if is_success(status_code) {
        queue.remove(pos);
        return Resolution::Done;
    }

    if item.policy.is_retryable(status_code)
        && let Some(backoff) = item.policy.backoff_after(item.attempt)
    {
        let available_at = now.saturating_add(backoff.saturating_mul(1000));
        item.status = ItemStatus::Available;
        item.pending_deadline = None;
        item.hidden_until = Some(available_at);
        return Resolution::RetryScheduled { available_at };
    }

    queue.remove(pos);
    Resolution::Failed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(state: &mut QueueState, key: &str, payload: &[u8], policy: RetryPolicy) -> ItemId {
        state
            .apply(&Command::Push {
                key: key.to_string(),
                payload: payload.to_vec(),
                policy,
            })
            .into_pushed()
            .unwrap()
    }

    fn pop(state: &mut QueueState, key: &str, count: u32, now_ms: u64) -> Vec<DequeuedItem> {
        state
            .apply(&Command::Pop {
                key: key.to_string(),
                count,
                now_ms,
            })
            .into_popped()
            .unwrap()
    }

    fn ack(state: &mut QueueState, key: &str, now_ms: u64, id: &str, code: u16) -> Resolution {
        let mut out = state
            .apply(&Command::Acknowledge {
                key: key.to_string(),
                now_ms,
                results: vec![ItemResult::new(id, code)],
            })
            .into_acknowledged()
            .unwrap();
        out.remove(0).1
    }

    #[test]
    fn ids_are_sequential_and_unique() {
        let mut state = QueueState::new();
        let a = push(&mut state, "q", b"a", RetryPolicy::default());
        let b = push(&mut state, "other", b"b", RetryPolicy::default());
        assert_eq!(a, "00000000000000000001");
        assert_eq!(b, "00000000000000000002");
    }

    #[test]
    fn pop_on_missing_queue_is_empty() {
        let mut state = QueueState::new();
        assert!(pop(&mut state, "nope", 3, 0).is_empty());
    }

    #[test]
    fn pop_sets_deadline_and_attempt() {
        let mut state = QueueState::new();
        let id = push(&mut state, "q", b"x", RetryPolicy::default());
        let items = pop(&mut state, "q", 1, 1_000);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].attempt, 1);

        let item = state.items("q").next().unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.pending_deadline, Some(121_000));
    }

    #[test]
    fn success_removes_item_and_drains_queue() {
        let mut state = QueueState::new();
        let id = push(&mut state, "q", b"x", RetryPolicy::default());
        pop(&mut state, "q", 1, 0);
        assert_eq!(ack(&mut state, "q", 10, &id, 204), Resolution::Done);
        assert!(state.is_empty());
    }

    #[test]
    fn non_retryable_code_fails_immediately() {
        let mut state = QueueState::new();
        let id = push(&mut state, "q", b"x", RetryPolicy::default());
        pop(&mut state, "q", 1, 0);
        assert_eq!(ack(&mut state, "q", 10, &id, 404), Resolution::Failed);
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn empty_backoff_means_single_attempt() {
        let mut state = QueueState::new();
        let policy = RetryPolicy {
            backoff_seconds: vec![],
            ..RetryPolicy::default()
        };
        let id = push(&mut state, "q", b"x", policy);
        pop(&mut state, "q", 1, 0);
        assert_eq!(ack(&mut state, "q", 10, &id, 500), Resolution::Failed);
    }

    #[test]
    fn stale_and_unknown_acks_are_ignored() {
        let mut state = QueueState::new();
        let id = push(&mut state, "q", b"x", RetryPolicy::default());
        // Not yet delivered.
        assert_eq!(ack(&mut state, "q", 0, &id, 200), Resolution::Ignored);
        assert_eq!(ack(&mut state, "q", 0, "missing", 200), Resolution::Ignored);
        assert_eq!(ack(&mut state, "nope", 0, &id, 200), Resolution::Ignored);
        assert_eq!(state.len(), 1);

        pop(&mut state, "q", 1, 0);
        assert_eq!(ack(&mut state, "q", 1, &id, 200), Resolution::Done);
        // Duplicate report after completion.
        assert_eq!(ack(&mut state, "q", 2, &id, 200), Resolution::Ignored);
    }

    #[test]
    fn expired_items_are_recycled_by_pop() {
        let mut state = QueueState::new();
        let policy = RetryPolicy {
            visibility_timeout_seconds: 5,
            ..RetryPolicy::default()
        };
        let id = push(&mut state, "q", b"x", policy);
        pop(&mut state, "q", 1, 0);
        assert!(pop(&mut state, "q", 1, 4_999).is_empty());

        let again = pop(&mut state, "q", 1, 5_000);
        assert_eq!(again[0].id, id);
        assert_eq!(again[0].attempt, 2);
    }

    #[test]
    fn count_is_capped_by_maximum() {
        let mut state = QueueState::new();
        for _ in 0..4 {
            push(&mut state, "q", b"x", RetryPolicy::default());
        }
        let query = CountQuery {
            key: "q".to_string(),
            statuses: [CountType::Available].into_iter().collect(),
            maximum: 3,
            now_ms: 0,
        };
        assert_eq!(state.count(&query), 3);
    }

    #[test]
    fn snapshot_bytes_roundtrip() {
        let mut state = QueueState::new();
        push(&mut state, "q", b"x", RetryPolicy::default());
        pop(&mut state, "q", 1, 42);
        let restored = QueueState::from_bytes(&state.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, state);
    }
}

//! Queue engine — the producer/consumer facing API.
//!
//! Wraps a [`QueueBackend`] (local command log or a replicated log) with
//! key namespacing, default retry policy selection, and timestamps taken
//! from a [`Clock`]. Every state transition, including recycling expired
//! deliveries, happens inside a replicated command.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::command::{Command, CommandOutput, CountQuery};
use crate::error::QueueResult;
use crate::log_store::CommandLog;
use crate::types::*;

/// Default namespace tag for job queues.
pub const DEFAULT_KEY_PREFIX: &str = "Job:";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where commands go to become durable and applied.
///
/// `submit` resolves once the command is committed and applied, with the
/// command's output. `count` reads the latest locally applied state.
pub trait QueueBackend: Send + Sync {
    fn submit(&self, command: Command) -> BoxFuture<'_, QueueResult<CommandOutput>>;

    fn count(&self, query: &CountQuery) -> QueueResult<u64>;
}

impl QueueBackend for CommandLog {
    fn submit(&self, command: Command) -> BoxFuture<'_, QueueResult<CommandOutput>> {
        Box::pin(async move { CommandLog::submit(self, command) })
    }

    fn count(&self, query: &CountQuery) -> QueueResult<u64> {
        Ok(CommandLog::count(self, query))
    }
}

/// Job queue API over a backend.
#[derive(Clone)]
pub struct QueueEngine {
    backend: Arc<dyn QueueBackend>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    default_policy: RetryPolicy,
}

impl QueueEngine {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_policy: RetryPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_default_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    /// Full queue key for a queue name.
    pub fn queue_key(&self, name: &str) -> QueueKey {
        format!("{}{name}", self.key_prefix)
    }

    /// Push with the default retry policy.
    pub async fn enqueue(&self, name: &str, payload: Vec<u8>) -> QueueResult<ItemId> {
        self.enqueue_with_policy(name, payload, self.default_policy.clone())
            .await
    }

    pub async fn enqueue_with_policy(
        &self,
        name: &str,
        payload: Vec<u8>,
        policy: RetryPolicy,
    ) -> QueueResult<ItemId> {
        let key = self.queue_key(name);
        let id = self
            .backend
            .submit(Command::Push {
                key: key.clone(),
                payload,
                policy,
            })
            .await?
            .into_pushed()?;
        debug!(%key, %id, "enqueued");
        Ok(id)
    }

    /// Pop up to `count` items for delivery. Leader only.
    pub async fn dequeue(&self, name: &str, count: u32) -> QueueResult<Vec<DequeuedItem>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let command = Command::Pop {
            key: self.queue_key(name),
            count,
            now_ms: self.clock.now_ms(),
        };
        self.backend.submit(command).await?.into_popped()
    }

    /// Report outcome codes for delivered items.
    pub async fn acknowledge(
        &self,
        name: &str,
        results: Vec<ItemResult>,
    ) -> QueueResult<Vec<(ItemId, Resolution)>> {
        if results.is_empty() {
            return Ok(Vec::new());
        }
        let command = Command::Acknowledge {
            key: self.queue_key(name),
            now_ms: self.clock.now_ms(),
            results,
        };
        self.backend.submit(command).await?.into_acknowledged()
    }

    /// Count items of a queue in the given classes, capped at `maximum`.
    pub fn count(&self, name: &str, statuses: &[CountType], maximum: u64) -> QueueResult<u64> {
        let query = CountQuery {
            key: self.queue_key(name),
            statuses: statuses.iter().copied().collect::<BTreeSet<_>>(),
            maximum,
            now_ms: self.clock.now_ms(),
        };
        self.backend.count(&query)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;

    fn engine() -> (QueueEngine, Arc<CommandLog>, Arc<ManualClock>) {
        let log = Arc::new(CommandLog::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let engine = QueueEngine::new(log.clone()).with_clock(clock.clone());
        (engine, log, clock)
    }

    #[tokio::test]
    async fn keys_are_namespaced() {
        let (engine, log, _) = engine();
        engine.enqueue("resize", b"{}".to_vec()).await.unwrap();
        let keys: Vec<String> = log.read(|s| s.keys().map(str::to_string).collect());
        assert_eq!(keys, vec!["Job:resize".to_string()]);
    }

    #[tokio::test]
    async fn custom_prefix_and_policy() {
        let log = Arc::new(CommandLog::open_in_memory().unwrap());
        let policy = RetryPolicy {
            backoff_seconds: vec![1],
            ..RetryPolicy::default()
        };
        let engine = QueueEngine::new(log.clone())
            .with_key_prefix("Fn:")
            .with_default_policy(policy.clone());
        engine.enqueue("a", vec![1]).await.unwrap();
        let stored = log.read(|s| s.items("Fn:a").next().unwrap().policy.clone());
        assert_eq!(stored, policy);
    }

    #[tokio::test]
    async fn zero_count_and_empty_ack_do_not_hit_the_log() {
        let (engine, log, _) = engine();
        assert!(engine.dequeue("q", 0).await.unwrap().is_empty());
        assert!(engine.acknowledge("q", vec![]).await.unwrap().is_empty());
        assert_eq!(log.last_index(), 0);
    }

    #[tokio::test]
    async fn dequeue_uses_clock_for_deadline() {
        let (engine, log, clock) = engine();
        engine.enqueue("q", vec![1]).await.unwrap();
        clock.advance(Duration::from_secs(10));
        engine.dequeue("q", 1).await.unwrap();
        let deadline = log.read(|s| s.items("Job:q").next().unwrap().pending_deadline);
        assert_eq!(deadline, Some(1_010_000 + 120_000));
    }

    #[tokio::test]
    async fn waiting_for_retry_is_counted_separately() {
        let (engine, _, clock) = engine();
        engine.enqueue("q", vec![1]).await.unwrap();
        let items = engine.dequeue("q", 1).await.unwrap();
        engine
            .acknowledge("q", vec![ItemResult::new(items[0].id.clone(), 503)])
            .await
            .unwrap();

        assert_eq!(engine.count("q", &[CountType::Available], u64::MAX).unwrap(), 0);
        assert_eq!(engine.count("q", &[CountType::WaitingForRetry], u64::MAX).unwrap(), 1);

        clock.advance(Duration::from_secs(2));
        assert_eq!(engine.count("q", &[CountType::Available], u64::MAX).unwrap(), 1);
    }
}

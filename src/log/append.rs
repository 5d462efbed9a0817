//! Append engine: optimistic read-CAS with bounded, linearly backed-off retries

use super::sequence::{Entry, Offset};
use super::store::LogStore;
use crate::common::{linear_backoff, Error, LogConfig, Result, METRICS};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

/// Attempt budget and backoff unit for appends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn from_config(config: &LogConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }

    /// Wait after the `attempt`-th failure (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        linear_backoff(attempt, self.base_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LogConfig::default())
    }
}

/// Per-key async locks serializing same-key appends within this process.
///
/// Only reduces wasted CAS round trips under local contention; cross-node
/// ordering still comes from the substrate.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Tracks an in-flight append in the gauge for as long as it lives
struct InFlight;

impl InFlight {
    fn start() -> Self {
        METRICS.appends_in_flight.inc();
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        METRICS.appends_in_flight.dec();
    }
}

pub struct AppendEngine {
    store: Arc<LogStore>,
    policy: RetryPolicy,
    locks: Option<KeyLocks>,
}

impl AppendEngine {
    pub fn new(store: Arc<LogStore>, policy: RetryPolicy, local_key_locks: bool) -> Self {
        Self {
            store,
            policy,
            locks: local_key_locks.then(KeyLocks::new),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Append `value` to `key` and return its offset.
    ///
    /// Each attempt reads the current sequence and CASes `current ++ [value]`
    /// against it. Conflicts and transient substrate errors back off
    /// `attempt * base_delay` and retry; once the budget is spent the call
    /// fails with `Error::StorageExhausted` and the log is untouched by it.
    pub async fn append(&self, key: &str, value: Entry) -> Result<Offset> {
        let _guard = match &self.locks {
            Some(locks) => Some(locks.acquire(key).await),
            None => None,
        };
        let _in_flight = InFlight::start();
        let start = Instant::now();

        for attempt in 1..=self.policy.max_attempts {
            METRICS.append_attempts_total.inc();

            let outcome = match self.store.read(key).await {
                Ok(current) => self.store.try_append(key, &current, value).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(offset) => {
                    METRICS.appends_total.inc();
                    METRICS.append_latency.observe_duration(start.elapsed());
                    tracing::debug!(key, value, offset, attempt, "Appended");
                    return Ok(offset);
                }
                Err(e) if e.is_retryable() => {
                    METRICS.append_conflicts_total.inc();
                    if attempt > 1 {
                        tracing::warn!(key, attempt, "Append attempt failed: {}", e);
                    } else {
                        tracing::debug!(key, attempt, "Append attempt failed: {}", e);
                    }
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    }
                }
                Err(e) => {
                    tracing::error!(key, attempt, "Append failed: {}", e);
                    return Err(e);
                }
            }
        }

        METRICS.append_exhausted_total.inc();
        tracing::error!(
            key,
            attempts = self.policy.max_attempts,
            "Giving up on append"
        );
        Err(Error::StorageExhausted {
            key: key.to_string(),
            attempts: self.policy.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKv;
    use serde_json::json;

    fn engine(kv: Arc<MemKv>, max_attempts: u32) -> AppendEngine {
        AppendEngine::new(
            Arc::new(LogStore::new(kv, "")),
            RetryPolicy::new(max_attempts, Duration::ZERO),
            true,
        )
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 100);
        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(3), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_sequential_offsets() {
        let kv = Arc::new(MemKv::new());
        let engine = engine(kv.clone(), 5);

        assert_eq!(engine.append("k1", 10).await.unwrap(), 0);
        assert_eq!(engine.append("k1", 11).await.unwrap(), 1);
        assert_eq!(engine.append("k2", 20).await.unwrap(), 0);
        assert_eq!(kv.get("k1"), Some(json!([10, 11])));
    }

    #[tokio::test]
    async fn test_corrupt_value_fails_fast() {
        let kv = Arc::new(MemKv::new());
        kv.put("k1", json!("not a log"));
        let engine = engine(kv.clone(), 5);

        let err = engine.append("k1", 1).await.unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
        assert_eq!(kv.get("k1"), Some(json!("not a log")));
    }

    #[tokio::test]
    async fn test_key_locks_are_per_key() {
        let locks = KeyLocks::new();
        let _a = locks.acquire("a").await;
        // A different key is not blocked by the held lock
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.acquire("b"))
            .await
            .unwrap();
        // The same key is
        assert!(
            tokio::time::timeout(Duration::from_millis(20), locks.acquire("a"))
                .await
                .is_err()
        );
    }
}

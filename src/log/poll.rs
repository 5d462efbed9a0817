//! Poll engine: stateless range reads over one or more logs

use super::sequence::{Entry, Offset};
use super::store::LogStore;
use crate::common::METRICS;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Entries per log, as `(offset, value)` pairs in offset order
pub type PollResult = BTreeMap<String, Vec<(Offset, Entry)>>;

pub struct PollEngine {
    store: Arc<LogStore>,
}

impl PollEngine {
    pub fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }

    /// Read `[from, len)` of every requested log.
    ///
    /// Keys are read concurrently and independently. A key with nothing at or
    /// past its offset, or whose read fails, is left out of the result.
    pub async fn poll(&self, requests: &BTreeMap<String, Offset>) -> PollResult {
        METRICS.polls_total.inc();

        let reads = requests.iter().map(|(key, &from)| async move {
            (key, from, self.store.read(key).await)
        });

        let mut result = PollResult::new();
        for (key, from, read) in join_all(reads).await {
            match read {
                Ok(sequence) => {
                    let entries = sequence.entries_from(from);
                    if !entries.is_empty() {
                        METRICS.poll_entries_total.add(entries.len() as u64);
                        result.insert(key.clone(), entries);
                    }
                }
                Err(e) => {
                    METRICS.poll_key_errors_total.inc();
                    tracing::warn!(key = %key, from, "Dropping key from poll: {}", e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKv;
    use serde_json::json;

    fn engine(kv: Arc<MemKv>) -> PollEngine {
        PollEngine::new(Arc::new(LogStore::new(kv, "")))
    }

    fn request(pairs: &[(&str, Offset)]) -> BTreeMap<String, Offset> {
        pairs.iter().map(|(k, o)| (k.to_string(), *o)).collect()
    }

    #[tokio::test]
    async fn test_poll_from_offset() {
        let kv = Arc::new(MemKv::new());
        kv.put("k", json!([100, 101, 102]));
        let engine = engine(kv);

        let result = engine.poll(&request(&[("k", 1)])).await;
        assert_eq!(result["k"], vec![(1, 101), (2, 102)]);
    }

    #[tokio::test]
    async fn test_poll_omits_exhausted_and_unknown() {
        let kv = Arc::new(MemKv::new());
        kv.put("k", json!([100, 101, 102]));
        let engine = engine(kv);

        let result = engine.poll(&request(&[("k", 5), ("missing", 0)])).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_poll_drops_corrupt_key_only() {
        let kv = Arc::new(MemKv::new());
        kv.put("good", json!([1]));
        kv.put("bad", json!({"not": "a log"}));
        let engine = engine(kv);

        let result = engine.poll(&request(&[("good", 0), ("bad", 0)])).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result["good"], vec![(0, 1)]);
    }
}

//! Commit tracker: process-local committed offsets per log

use super::sequence::Offset;
use crate::common::{CommitPolicy, METRICS};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Storage for consumer progress. The broker only talks to this trait so a
/// shared or persistent store can replace the in-memory one.
pub trait CommitStore: Send + Sync {
    /// Fold each requested offset into the stored one
    fn commit(&self, offsets: &BTreeMap<String, Offset>);

    /// Committed offset of each key; 0 for keys never committed
    fn list(&self, keys: &[String]) -> BTreeMap<String, Offset>;
}

/// In-memory committed offsets behind a reader/writer lock.
///
/// State is not persisted and not shared with other nodes.
#[derive(Debug, Default)]
pub struct CommitTracker {
    policy: CommitPolicy,
    offsets: RwLock<HashMap<String, Offset>>,
}

impl CommitTracker {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            offsets: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }
}

impl CommitStore for CommitTracker {
    fn commit(&self, offsets: &BTreeMap<String, Offset>) {
        let mut committed = self.offsets.write().unwrap_or_else(PoisonError::into_inner);
        for (key, &requested) in offsets {
            let slot = committed.entry(key.clone()).or_insert(0);
            *slot = self.policy.combine(*slot, requested);
            tracing::debug!(key = %key, requested, committed = *slot, "Committed offset");
        }
        METRICS.commits_total.add(offsets.len() as u64);
    }

    fn list(&self, keys: &[String]) -> BTreeMap<String, Offset> {
        let committed = self.offsets.read().unwrap_or_else(PoisonError::into_inner);
        keys.iter()
            .map(|key| (key.clone(), committed.get(key).copied().unwrap_or(0)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(pairs: &[(&str, Offset)]) -> BTreeMap<String, Offset> {
        pairs.iter().map(|(k, o)| (k.to_string(), *o)).collect()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_unknown_keys_list_zero() {
        let tracker = CommitTracker::new(CommitPolicy::Max);
        assert_eq!(tracker.list(&keys(&["a"])), offsets(&[("a", 0)]));
    }

    #[test]
    fn test_max_policy_moves_forward() {
        let tracker = CommitTracker::new(CommitPolicy::Max);
        tracker.commit(&offsets(&[("a", 5), ("b", 2)]));
        tracker.commit(&offsets(&[("a", 3)]));

        assert_eq!(
            tracker.list(&keys(&["a", "b", "c"])),
            offsets(&[("a", 5), ("b", 2), ("c", 0)])
        );
    }

    #[test]
    fn test_min_policy_keeps_smaller() {
        let tracker = CommitTracker::new(CommitPolicy::Min);
        tracker.commit(&offsets(&[("a", 5)]));
        // Lazily created at 0, so min never rises above it
        assert_eq!(tracker.list(&keys(&["a"])), offsets(&[("a", 0)]));
    }

    #[test]
    fn test_commit_is_idempotent() {
        for policy in [CommitPolicy::Max, CommitPolicy::Min] {
            let once = CommitTracker::new(policy);
            once.commit(&offsets(&[("k", 3)]));

            let twice = CommitTracker::new(policy);
            twice.commit(&offsets(&[("k", 3)]));
            twice.commit(&offsets(&[("k", 3)]));

            assert_eq!(once.list(&keys(&["k"])), twice.list(&keys(&["k"])));
        }
    }
}

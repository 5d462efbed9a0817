//! In-process substrate

use super::KvSubstrate;
use crate::common::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// In-memory store; a single mutex makes every operation linearizable.
#[derive(Debug, Default)]
pub struct MemKv {
    map: Mutex<HashMap<String, Value>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a value unconditionally
    pub fn put(&self, key: &str, value: Value) {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    /// Current value, if any
    pub fn get(&self, key: &str) -> Option<Value> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvSubstrate for MemKv {
    async fn read(&self, key: &str) -> Result<Value> {
        self.get(key).ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Value,
        new: Value,
        create_if_missing: bool,
    ) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        match map.get_mut(key) {
            Some(current) if *current == expected => {
                *current = new;
                Ok(())
            }
            Some(_) => Err(Error::CasConflict(key.to_string())),
            None if create_if_missing => {
                map.insert(key.to_string(), new);
                Ok(())
            }
            None => Err(Error::NotFound(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_missing() {
        let kv = MemKv::new();
        assert!(matches!(kv.read("nope").await, Err(Error::NotFound(k)) if k == "nope"));
    }

    #[tokio::test]
    async fn test_cas_create_and_swap() {
        let kv = MemKv::new();
        kv.compare_and_swap("k", json!([]), json!([1]), true)
            .await
            .unwrap();
        assert_eq!(kv.read("k").await.unwrap(), json!([1]));

        kv.compare_and_swap("k", json!([1]), json!([1, 2]), true)
            .await
            .unwrap();
        assert_eq!(kv.read("k").await.unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_cas_conflict_leaves_value() {
        let kv = MemKv::new();
        kv.put("k", json!([1, 2]));

        let err = kv
            .compare_and_swap("k", json!([1]), json!([1, 3]), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CasConflict(_)));
        assert_eq!(kv.get("k"), Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_cas_missing_without_create() {
        let kv = MemKv::new();
        let err = kv
            .compare_and_swap("k", json!([]), json!([1]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(kv.is_empty());
    }
}

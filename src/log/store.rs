//! Log store: LogKey to substrate key mapping, plus sequence read and CAS

use super::sequence::{Entry, LogSequence, Offset};
use crate::common::{prefixed_key, Error, Result};
use crate::kv::KvSubstrate;
use std::sync::Arc;

/// Owns only the mapping from log keys to substrate keys; entry data lives
/// in the substrate.
pub struct LogStore {
    kv: Arc<dyn KvSubstrate>,
    key_prefix: String,
}

impl LogStore {
    pub fn new(kv: Arc<dyn KvSubstrate>, key_prefix: impl Into<String>) -> Self {
        Self {
            kv,
            key_prefix: key_prefix.into(),
        }
    }

    /// Substrate key holding the sequence of `key`
    pub fn substrate_key(&self, key: &str) -> String {
        prefixed_key(&self.key_prefix, key)
    }

    /// Read the current sequence. A key that was never written reads as empty.
    pub async fn read(&self, key: &str) -> Result<LogSequence> {
        match self.kv.read(&self.substrate_key(key)).await {
            Ok(value) => LogSequence::decode(key, value),
            Err(Error::NotFound(_)) => Ok(LogSequence::empty()),
            Err(e) => Err(e),
        }
    }

    /// Try to commit `current ++ [value]` in one CAS against exactly the
    /// value `current` was read from. Returns the offset on success.
    pub async fn try_append(
        &self,
        key: &str,
        current: &LogSequence,
        value: Entry,
    ) -> Result<Offset> {
        let (candidate, offset) = current.appended(value);
        self.kv
            .compare_and_swap(
                &self.substrate_key(key),
                current.stored().clone(),
                candidate,
                true,
            )
            .await?;
        Ok(offset)
    }
}

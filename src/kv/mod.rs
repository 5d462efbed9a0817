//! Linearizable key-value substrate
//!
//! The log engines never own entry data; every sequence lives as a single
//! JSON value behind this trait. Atomicity across nodes comes entirely from
//! `compare_and_swap`.

pub mod lin_kv;
pub mod memory;

pub use lin_kv::LinKv;
pub use memory::MemKv;

use crate::common::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Point reads and compare-and-swap over JSON values.
#[async_trait]
pub trait KvSubstrate: Send + Sync {
    /// Read the current value. Fails with `Error::NotFound` if the key was
    /// never written.
    async fn read(&self, key: &str) -> Result<Value>;

    /// Atomically replace `expected` with `new`.
    ///
    /// Fails with `Error::CasConflict` when the stored value differs from
    /// `expected`. When the key is absent, the write succeeds only if
    /// `create_if_missing` is set; otherwise it fails with `Error::NotFound`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Value,
        new: Value,
        create_if_missing: bool,
    ) -> Result<()>;
}

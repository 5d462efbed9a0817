//! Common utilities and types shared across minilog

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{CommitConfig, CommitPolicy, Config, HttpConfig, KvConfig, LogConfig};
pub use error::{codes, Error, Result};
pub use metrics::METRICS;
pub use utils::{linear_backoff, prefixed_key, timestamp_now_millis};

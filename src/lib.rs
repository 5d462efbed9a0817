//! # minilog
//!
//! An offset-addressed append log (a scaled-down commit-log broker) layered
//! on an external linearizable key-value store:
//! - Offsets allocated by optimistic read-modify-CAS with bounded retries
//! - Range polling over one or more logs
//! - Per-log committed offsets tracked in process memory
//! - Line-delimited JSON node protocol and an HTTP API in front
//!
//! ## Architecture
//!
//! ```text
//!   requests (stdin / HTTP)
//!            │
//!   ┌────────▼────────┐
//!   │     Broker      │  decode + validate, dispatch
//!   └──┬─────┬─────┬──┘
//!      │     │     │
//!  Append   Poll  CommitTracker (in memory)
//!      │     │
//!   ┌──▼─────▼──┐
//!   │ LogStore  │  log key → substrate key, one JSON array per log
//!   └─────┬─────┘
//!         │ read / cas
//!   ┌─────▼──────────────┐
//!   │ KvSubstrate        │  lin-kv service (LinKv) or in-process (MemKv)
//!   └────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Run as a node against a lin-kv service
//! ```bash
//! minilog-node --kv-service lin-kv
//! ```
//!
//! ### Run the HTTP API with an in-process store
//! ```bash
//! minilog-serve --bind 127.0.0.1:8080
//! curl -XPOST localhost:8080/send -d '{"key":"k1","msg":42}' -H 'content-type: application/json'
//! ```

pub mod broker;
pub mod common;
pub mod http;
pub mod kv;
pub mod log;
pub mod node;

// Re-export commonly used types
pub use broker::Broker;
pub use common::{Config, Error, Result};
pub use kv::{KvSubstrate, LinKv, MemKv};
pub use node::Node;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");

//! Substrate client for an external linearizable KV service
//!
//! Requests are ordinary node RPCs: `read {key}` and
//! `cas {key, from, to, create_if_not_exists}`.

use super::KvSubstrate;
use crate::common::{codes, Error, KvConfig, Result};
use crate::node::{Body, Node};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct LinKv {
    node: Arc<Node>,
    service: String,
    timeout: Duration,
}

impl LinKv {
    pub fn new(node: Arc<Node>, config: &KvConfig) -> Self {
        Self {
            node,
            service: config.service.clone(),
            timeout: config.rpc_timeout(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn map_error(key: &str, err: Error) -> Error {
        match err {
            Error::Rpc { code, .. } if code == codes::KEY_DOES_NOT_EXIST => {
                Error::NotFound(key.to_string())
            }
            Error::Rpc { code, .. } if code == codes::PRECONDITION_FAILED => {
                Error::CasConflict(key.to_string())
            }
            other => other,
        }
    }
}

#[async_trait]
impl KvSubstrate for LinKv {
    async fn read(&self, key: &str) -> Result<Value> {
        let body = Body::new("read").with_field("key", key);
        let reply = self
            .node
            .rpc(&self.service, body, self.timeout)
            .await
            .map_err(|e| Self::map_error(key, e))?;

        reply
            .field("value")
            .cloned()
            .ok_or_else(|| Error::Corrupted(format!("read_ok for {} has no value", key)))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Value,
        new: Value,
        create_if_missing: bool,
    ) -> Result<()> {
        let body = Body::new("cas")
            .with_field("key", key)
            .with_field("from", expected)
            .with_field("to", new)
            .with_field("create_if_not_exists", create_if_missing);

        self.node
            .rpc(&self.service, body, self.timeout)
            .await
            .map(|_| ())
            .map_err(|e| Self::map_error(key, e))
    }
}

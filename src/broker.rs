//! Request handler layer
//!
//! Typed request/response shapes for the four broker operations and the
//! `Broker` that validates them and dispatches to the log engines. Both the
//! node transport and the HTTP surface go through `Broker::dispatch`.

use crate::common::{Config, Error, Result, METRICS};
use crate::kv::KvSubstrate;
use crate::log::{
    AppendEngine, CommitStore, CommitTracker, Entry, LogStore, Offset, PollEngine, PollResult,
    RetryPolicy,
};
use crate::node::{Body, Handler, Message, Node};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Operation names the broker answers to. `append` is an alias of `send`.
pub const OPERATIONS: [&str; 5] = [
    "send",
    "append",
    "poll",
    "commit_offsets",
    "list_committed_offsets",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub key: String,
    pub msg: Entry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResponse {
    pub offset: Offset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollRequest {
    pub offsets: BTreeMap<String, Offset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub msgs: PollResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitOffsetsRequest {
    pub offsets: BTreeMap<String, Offset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitOffsetsResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListCommittedOffsetsRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListCommittedOffsetsResponse {
    pub offsets: BTreeMap<String, Offset>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Send(SendRequest),
    Poll(PollRequest),
    CommitOffsets(CommitOffsetsRequest),
    ListCommittedOffsets(ListCommittedOffsetsRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Send(SendResponse),
    Poll(PollResponse),
    CommitOffsets(CommitOffsetsResponse),
    ListCommittedOffsets(ListCommittedOffsetsResponse),
}

fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::MalformedRequest("log key must not be empty".into()));
    }
    Ok(())
}

impl Request {
    /// Decode and validate a request body. Fails before any substrate access.
    pub fn decode(body: &Body) -> Result<Self> {
        let request = match body.kind.as_str() {
            "send" | "append" => Request::Send(body.decode()?),
            "poll" => Request::Poll(body.decode()?),
            "commit_offsets" => Request::CommitOffsets(body.decode()?),
            "list_committed_offsets" => Request::ListCommittedOffsets(body.decode()?),
            other => return Err(Error::NotSupported(other.to_string())),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Request::Send(req) => require_key(&req.key),
            Request::Poll(PollRequest { offsets })
            | Request::CommitOffsets(CommitOffsetsRequest { offsets }) => {
                offsets.keys().try_for_each(|k| require_key(k))
            }
            Request::ListCommittedOffsets(req) => req.keys.iter().try_for_each(|k| require_key(k)),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Request::Send(_) => "send",
            Request::Poll(_) => "poll",
            Request::CommitOffsets(_) => "commit_offsets",
            Request::ListCommittedOffsets(_) => "list_committed_offsets",
        }
    }
}

impl Response {
    /// Encode as a reply body; the type is filled in by the transport.
    pub fn into_body(self) -> Result<Body> {
        match self {
            Response::Send(resp) => Body::with_payload("", &resp),
            Response::Poll(resp) => Body::with_payload("", &resp),
            Response::CommitOffsets(resp) => Body::with_payload("", &resp),
            Response::ListCommittedOffsets(resp) => Body::with_payload("", &resp),
        }
    }
}

pub struct Broker {
    store: Arc<LogStore>,
    appender: AppendEngine,
    poller: PollEngine,
    commits: Arc<dyn CommitStore>,
}

impl Broker {
    pub fn new(kv: Arc<dyn KvSubstrate>, config: &Config) -> Self {
        let commits = Arc::new(CommitTracker::new(config.commit.policy));
        Self::with_commit_store(kv, config, commits)
    }

    pub fn with_commit_store(
        kv: Arc<dyn KvSubstrate>,
        config: &Config,
        commits: Arc<dyn CommitStore>,
    ) -> Self {
        let store = Arc::new(LogStore::new(kv, config.log.key_prefix.clone()));
        let appender = AppendEngine::new(
            store.clone(),
            RetryPolicy::from_config(&config.log),
            config.log.local_key_locks,
        );
        let poller = PollEngine::new(store.clone());
        Self {
            store,
            appender,
            poller,
            commits,
        }
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub async fn append(&self, key: &str, value: Entry) -> Result<Offset> {
        self.appender.append(key, value).await
    }

    pub async fn poll(&self, offsets: &BTreeMap<String, Offset>) -> PollResult {
        self.poller.poll(offsets).await
    }

    pub fn commit_offsets(&self, offsets: &BTreeMap<String, Offset>) {
        self.commits.commit(offsets)
    }

    pub fn list_committed_offsets(&self, keys: &[String]) -> BTreeMap<String, Offset> {
        self.commits.list(keys)
    }

    /// Run one validated request
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        let op = request.operation();
        let start = Instant::now();

        let result = match request {
            Request::Send(req) => self
                .append(&req.key, req.msg)
                .await
                .map(|offset| Response::Send(SendResponse { offset })),
            Request::Poll(req) => Ok(Response::Poll(PollResponse {
                msgs: self.poll(&req.offsets).await,
            })),
            Request::CommitOffsets(req) => {
                self.commit_offsets(&req.offsets);
                Ok(Response::CommitOffsets(CommitOffsetsResponse {}))
            }
            Request::ListCommittedOffsets(req) => {
                Ok(Response::ListCommittedOffsets(ListCommittedOffsetsResponse {
                    offsets: self.list_committed_offsets(&req.keys),
                }))
            }
        };

        METRICS.record_request(op, start.elapsed(), result.is_ok());
        result
    }

    /// Register this broker for every operation it serves
    pub fn register(self: &Arc<Self>, node: &Node) {
        for op in OPERATIONS {
            node.register(op, self.clone());
        }
    }
}

#[async_trait]
impl Handler for Broker {
    async fn handle(&self, _node: &Arc<Node>, request: &Message) -> Result<Body> {
        let decoded = Request::decode(&request.body)?;
        self.dispatch(decoded).await?.into_body()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKv;
    use serde_json::json;

    fn broker() -> Broker {
        Broker::new(Arc::new(MemKv::new()), &Config::default())
    }

    fn body(kind: &str, fields: serde_json::Value) -> Body {
        let mut body = Body::new(kind);
        if let serde_json::Value::Object(map) = fields {
            body.fields = map;
        }
        body
    }

    #[test]
    fn test_decode_send_and_alias() {
        let send = Request::decode(&body("send", json!({"key": "k1", "msg": 5}))).unwrap();
        let append = Request::decode(&body("append", json!({"key": "k1", "msg": 5}))).unwrap();
        assert_eq!(send, append);
        assert_eq!(send.operation(), "send");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for (kind, fields) in [
            ("send", json!({"key": "k1"})),
            ("send", json!({"key": "k1", "msg": "five"})),
            ("send", json!({"key": "", "msg": 1})),
            ("poll", json!({"offsets": {"k1": -1}})),
            ("commit_offsets", json!({})),
            ("list_committed_offsets", json!({"keys": "k1"})),
        ] {
            let err = Request::decode(&body(kind, fields)).unwrap_err();
            assert!(matches!(err, Error::MalformedRequest(_)), "{}: {:?}", kind, err);
        }
    }

    #[test]
    fn test_decode_unknown_operation() {
        let err = Request::decode(&Body::new("broadcast")).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_dispatch_flow() {
        let broker = broker();

        for (i, value) in [7, 8, 9].into_iter().enumerate() {
            let resp = broker
                .dispatch(Request::Send(SendRequest {
                    key: "k".into(),
                    msg: value,
                }))
                .await
                .unwrap();
            assert_eq!(resp, Response::Send(SendResponse { offset: i as u64 }));
        }

        let resp = broker
            .dispatch(Request::Poll(PollRequest {
                offsets: BTreeMap::from([("k".to_string(), 1)]),
            }))
            .await
            .unwrap();
        let body = resp.into_body().unwrap();
        assert_eq!(body.field("msgs"), Some(&json!({"k": [[1, 8], [2, 9]]})));

        broker
            .dispatch(Request::CommitOffsets(CommitOffsetsRequest {
                offsets: BTreeMap::from([("k".to_string(), 2)]),
            }))
            .await
            .unwrap();
        let resp = broker
            .dispatch(Request::ListCommittedOffsets(ListCommittedOffsetsRequest {
                keys: vec!["k".into(), "other".into()],
            }))
            .await
            .unwrap();
        assert_eq!(
            resp.into_body().unwrap().field("offsets"),
            Some(&json!({"k": 2, "other": 0}))
        );
    }

    #[test]
    fn test_empty_commit_response_body() {
        let body = Response::CommitOffsets(CommitOffsetsResponse {})
            .into_body()
            .unwrap();
        assert!(body.fields.is_empty());
        assert!(body.kind.is_empty());
    }
}

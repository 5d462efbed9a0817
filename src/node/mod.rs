//! Node transport
//!
//! Reads newline-delimited JSON envelopes, dispatches requests to registered
//! handlers (one tokio task per request), routes replies to in-flight RPCs,
//! and funnels every outbound message through a single writer task.

pub mod message;

pub use message::{Body, Message};

use crate::common::{Error, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

/// Handles one operation type. The returned body is sent back as the reply;
/// an empty `type` defaults to `<request type>_ok`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, node: &Arc<Node>, request: &Message) -> Result<Body>;
}

#[derive(Debug, Deserialize)]
struct InitRequest {
    node_id: String,
    #[serde(default)]
    node_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct Identity {
    node_id: Option<String>,
    node_ids: Vec<String>,
}

pub struct Node {
    identity: RwLock<Identity>,
    next_msg_id: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Body>>>,
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl Node {
    /// Create a node and the receiving end of its outbound queue.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let node = Arc::new(Self {
            identity: RwLock::new(Identity::default()),
            next_msg_id: AtomicU64::new(1),
            outbound: Mutex::new(Some(tx)),
            pending: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        });
        (node, rx)
    }

    /// Id assigned by `init`, if it has arrived
    pub fn node_id(&self) -> Option<String> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .node_id
            .clone()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .node_ids
            .clone()
    }

    /// Register the handler for an operation type
    pub fn register(&self, op: &str, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op.to_string(), handler);
    }

    fn handler(&self, op: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
            .cloned()
    }

    fn allocate_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a message for the writer
    pub fn send(&self, dest: &str, body: Body) -> Result<()> {
        let src = self.node_id().unwrap_or_default();
        self.send_from(src, dest, body)
    }

    fn send_from(&self, src: String, dest: &str, body: Body) -> Result<()> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = outbound
            .as_ref()
            .ok_or_else(|| Error::Internal("node output is closed".into()))?;
        tx.send(Message {
            id: None,
            src,
            dest: dest.to_string(),
            body,
        })
        .map_err(|_| Error::Internal("node output is closed".into()))
    }

    /// Reply to `request`, filling in `in_reply_to`, a fresh `msg_id`, and a
    /// default `<type>_ok` type.
    pub fn reply(&self, request: &Message, mut body: Body) -> Result<()> {
        if body.kind.is_empty() {
            body.kind = format!("{}_ok", request.body.kind);
        }
        body.msg_id = Some(self.allocate_msg_id());
        body.in_reply_to = request.body.msg_id;
        self.send_from(request.dest.clone(), &request.src, body)
    }

    /// Send a request and wait for its reply. Error replies become
    /// `Error::Rpc`; no reply within `timeout` becomes `Error::Timeout`.
    pub async fn rpc(&self, dest: &str, mut body: Body, timeout: Duration) -> Result<Body> {
        let msg_id = self.allocate_msg_id();
        body.msg_id = Some(msg_id);
        let kind = body.kind.clone();

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(msg_id, tx);

        if let Err(e) = self.send(dest, body) {
            self.forget(msg_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) if reply.is_error() => Err(reply.to_error()),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Internal(format!(
                "reply channel for {} dropped",
                msg_id
            ))),
            Err(_) => {
                self.forget(msg_id);
                Err(Error::Timeout(format!("{} to {} (msg {})", kind, dest, msg_id)))
            }
        }
    }

    fn forget(&self, msg_id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&msg_id);
    }

    /// Route one inbound message.
    ///
    /// Replies complete their pending RPC and `init` is answered inline; any
    /// other request yields a future that runs its handler and sends the reply.
    pub fn accept(self: &Arc<Self>, msg: Message) -> Option<BoxFuture<'static, ()>> {
        if let Some(in_reply_to) = msg.body.in_reply_to {
            let waiter = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&in_reply_to);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(msg.body);
                }
                None => tracing::debug!(in_reply_to, "Dropping reply with no waiter"),
            }
            return None;
        }

        if msg.body.kind == "init" {
            if let Err(e) = self.handle_init(&msg) {
                tracing::warn!("init failed: {}", e);
                let _ = self.reply(&msg, Body::from_error(&e));
            }
            return None;
        }

        let node = Arc::clone(self);
        Some(Box::pin(async move { node.handle_request(msg).await }))
    }

    fn handle_init(&self, msg: &Message) -> Result<()> {
        let init: InitRequest = msg.body.decode()?;
        tracing::info!(node_id = %init.node_id, peers = init.node_ids.len(), "Node initialized");
        {
            let mut identity = self.identity.write().unwrap_or_else(PoisonError::into_inner);
            identity.node_id = Some(init.node_id);
            identity.node_ids = init.node_ids;
        }
        self.reply(msg, Body::new("init_ok"))
    }

    async fn handle_request(self: Arc<Self>, msg: Message) {
        let result = match self.handler(&msg.body.kind) {
            Some(handler) => handler.handle(&self, &msg).await,
            None => Err(Error::NotSupported(msg.body.kind.clone())),
        };

        let body = match result {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(op = %msg.body.kind, src = %msg.src, "Request failed: {}", e);
                Body::from_error(&e)
            }
        };

        if let Err(e) = self.reply(&msg, body) {
            tracing::error!("Failed to send reply: {}", e);
        }
    }

    /// Process input until EOF, then wait for in-flight requests.
    pub async fn run<R>(self: &Arc<Self>, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut tasks = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let msg: Message = match serde_json::from_str(line) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!("Skipping unparseable message: {}", e);
                    continue;
                }
            };
            if let Some(task) = self.accept(msg) {
                tasks.spawn(task);
            }
            // Reap finished handlers so the set stays small.
            while tasks.try_join_next().is_some() {}
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!("Request task panicked: {}", e);
            }
        }
        Ok(())
    }

    /// Stop accepting outbound messages; the writer drains and exits.
    pub fn close(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Write each outbound message as one JSON line, flushing after every line.
pub async fn write_output<W>(mut rx: mpsc::UnboundedReceiver<Message>, mut out: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let mut line = serde_json::to_vec(&msg)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }
    Ok(())
}

//! The node runtime: dispatch, RPC correlation, timers, and the write mutex.
//!
//! Modeled on the teacher's `Raft`/`RaftInner` actor-handle split: the
//! public handle (`Node`) is a cheap `Arc` clone, and every blocking
//! interaction (`rpc`, `sync_rpc`) is a oneshot channel registered against
//! a freshly minted id rather than a callback stored under a re-entrant
//! lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::error::RpcError;
use crate::message::Body;
use crate::message::Message;

type HandlerFuture = BoxFuture<'static, Result<(), RpcError>>;
type Handler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;
type PeriodicTask = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Identity {
    node_id: String,
    node_ids: Vec<String>,
}

struct Inner {
    identity: RwLock<Option<Identity>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    next_msg_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    handlers: RwLock<HashMap<String, Handler>>,
    periodic: Mutex<Vec<(String, Duration, PeriodicTask)>>,
    writer: Mutex<tokio::io::Stdout>,
    started_at: Instant,
    inflight: AtomicI64,
    drained: Notify,
}

/// A handle to the running node. Cheap to clone; clone liberally into
/// handler closures and periodic tasks.
#[derive(Clone)]
pub struct Node {
    inner: Arc<Inner>,
}

impl Node {
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                identity: RwLock::new(None),
                ready_tx,
                ready_rx,
                next_msg_id: AtomicU64::new(1),
                callbacks: Mutex::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                periodic: Mutex::new(Vec::new()),
                writer: Mutex::new(tokio::io::stdout()),
                started_at: Instant::now(),
                inflight: AtomicI64::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Monotonic seconds since the node runtime was constructed.
    pub fn now(&self) -> f64 {
        self.inner.started_at.elapsed().as_secs_f64()
    }

    /// This node's own id. Panics if called before `init` — every handler
    /// registered via `register_handler` only ever runs after `init`, so
    /// this is safe to call unconditionally from within one.
    pub fn id(&self) -> String {
        self.try_id().expect("node.id() called before init")
    }

    pub fn try_id(&self) -> Option<String> {
        self.inner.identity.try_read().ok().and_then(|g| g.as_ref().map(|i| i.node_id.clone()))
    }

    /// All node ids in the cluster, excluding this node.
    pub fn other_node_ids(&self) -> Vec<String> {
        let guard = self.inner.identity.try_read().expect("identity lock poisoned");
        match guard.as_ref() {
            Some(identity) => identity.node_ids.iter().filter(|id| **id != identity.node_id).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn node_ids(&self) -> Vec<String> {
        let guard = self.inner.identity.try_read().expect("identity lock poisoned");
        guard.as_ref().map(|i| i.node_ids.clone()).unwrap_or_default()
    }

    /// Bind a handler to a request `type`. Must be called before `run`;
    /// handlers run on their own task so that `sync_rpc` inside one never
    /// stalls the dispatcher.
    pub fn register_handler<F, Fut>(&self, typ: &str, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |msg| handler(msg).boxed());
        let mut handlers = self.inner.handlers.try_write().expect("register_handler called after run");
        handlers.insert(typ.to_string(), handler);
    }

    /// Schedule `task` to run on its own worker every `period`, starting
    /// once `init` has been received. Must be called before `run`.
    pub fn every<F, Fut>(&self, name: &str, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task: PeriodicTask = Arc::new(move || task().boxed());
        let mut periodic = self.inner.periodic.try_lock().expect("every called after run");
        periodic.push((name.to_string(), period, task));
    }

    /// Write `msg` to stdout, guarded by the write mutex so messages are
    /// emitted whole.
    pub async fn send(&self, msg: &Message) {
        trace!(dest = %msg.dest, typ = %msg.body.typ, "send");
        let mut line = match serde_json::to_vec(msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(%err, "failed to serialize outbound message");
                return;
            }
        };
        line.push(b'\n');
        let mut writer = self.inner.writer.lock().await;
        if let Err(err) = writer.write_all(&line).await {
            error!(%err, "failed to write outbound message");
        }
        if let Err(err) = writer.flush().await {
            error!(%err, "failed to flush stdout");
        }
    }

    /// Reply to `request`, copying its `msg_id` into `in_reply_to`.
    pub async fn reply(&self, request: &Message, mut body: Body) {
        body.in_reply_to = request.body.msg_id;
        let response = Message::new(self.id(), request.src.clone(), body);
        self.send(&response).await;
    }

    pub async fn reply_error(&self, request: &Message, err: RpcError) {
        self.reply(request, err.into_body()).await;
    }

    fn next_msg_id(&self) -> u64 {
        self.inner.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `body` to `dest` as a request, invoking `callback` exactly once
    /// when a reply with matching `in_reply_to` arrives. Late replies whose
    /// registration has already fired (or has been dropped) are ignored.
    pub fn rpc<F>(&self, dest: &str, mut body: Body, callback: F)
    where
        F: FnOnce(Message) + Send + 'static,
    {
        let msg_id = self.next_msg_id();
        body.msg_id = Some(msg_id);
        let request = Message::new(self.id(), dest.to_string(), body);

        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let node = self.clone();
        tokio::spawn(async move {
            {
                let mut callbacks = inner.callbacks.lock().await;
                callbacks.insert(msg_id, tx);
            }
            node.send(&request).await;
            if let Ok(reply) = rx.await {
                callback(reply);
            }
        });
    }

    /// Broadcast `body` as an RPC to every other node in the cluster.
    pub fn brpc<F>(&self, body: Body, callback: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        for dest in self.other_node_ids() {
            let callback = callback.clone();
            self.rpc(&dest, body.clone(), move |msg| callback(msg));
        }
    }

    /// Issue an RPC and block the calling task until the reply arrives or
    /// `timeout` elapses (default 10s). On timeout, fails with `RpcError::timeout`.
    pub async fn sync_rpc(&self, dest: &str, body: Body, timeout: Option<Duration>) -> Result<Message, RpcError> {
        let timeout = timeout.unwrap_or(Duration::from_secs(10));
        let msg_id = self.next_msg_id();
        let mut body = body;
        body.msg_id = Some(msg_id);
        let request = Message::new(self.id(), dest.to_string(), body);

        let (tx, rx) = oneshot::channel();
        {
            let mut callbacks = self.inner.callbacks.lock().await;
            callbacks.insert(msg_id, tx);
        }
        self.send(&request).await;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RpcError::timeout()),
            Err(_) => {
                self.inner.callbacks.lock().await.remove(&msg_id);
                Err(RpcError::timeout())
            }
        }
    }

    /// Drive the dispatch loop: read newline-delimited JSON from stdin
    /// until EOF, deliver requests to handlers and replies to callbacks.
    pub async fn run(&self) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let msg: Message = match serde_json::from_str(&line) {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(%err, %line, "failed to parse inbound message, dropping");
                    continue;
                }
            };
            self.dispatch(msg);
        }

        self.drain().await;
        Ok(())
    }

    fn dispatch(&self, msg: Message) {
        if let Some(in_reply_to) = msg.body.in_reply_to {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let sender = inner.callbacks.lock().await.remove(&in_reply_to);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(msg);
                    }
                    None => debug!(in_reply_to, "dropping late reply, no registered callback"),
                }
            });
            return;
        }

        let node = self.clone();
        self.inner.inflight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            node.dispatch_request(msg).await;
            if node.inner.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
                node.inner.drained.notify_waiters();
            }
        });
    }

    async fn dispatch_request(&self, msg: Message) {
        if msg.body.typ == "init" {
            self.handle_init(msg).await;
            return;
        }

        self.wait_until_initialized().await;

        let handler = {
            let handlers = self.inner.handlers.read().await;
            handlers.get(&msg.body.typ).cloned()
        };

        let Some(handler) = handler else {
            let err = RpcError::not_supported(format!("unsupported message type `{}`", msg.body.typ));
            self.reply_error(&msg, err).await;
            return;
        };

        let request = msg.clone();
        let result = std::panic::AssertUnwindSafe(handler(msg)).catch_unwind().await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.reply_error(&request, err).await,
            Err(panic) => {
                let text = panic_message(&panic);
                error!(%text, typ = %request.body.typ, "handler panicked");
                self.reply_error(&request, RpcError::crash(text)).await;
            }
        }
    }

    async fn handle_init(&self, msg: Message) {
        let node_id: String = match msg.body.require("node_id") {
            Ok(v) => v,
            Err(e) => return self.reply_error(&msg, RpcError::malformed_request(e)).await,
        };
        let node_ids: Vec<String> = match msg.body.require("node_ids") {
            Ok(v) => v,
            Err(e) => return self.reply_error(&msg, RpcError::malformed_request(e)).await,
        };

        tracing::info!(node_id = %node_id, "node initialized");

        {
            let mut identity = self.inner.identity.write().await;
            *identity = Some(Identity { node_id, node_ids });
        }

        self.reply(&msg, Body::new("init_ok")).await;
        let _ = self.inner.ready_tx.send(true);
        self.start_periodic_tasks().await;
    }

    async fn wait_until_initialized(&self) {
        let mut ready_rx = self.inner.ready_rx.clone();
        if *ready_rx.borrow() {
            return;
        }
        let _ = ready_rx.changed().await;
    }

    async fn drain(&self) {
        while self.inner.inflight.load(Ordering::SeqCst) > 0 {
            self.inner.drained.notified().await;
        }
    }

    async fn start_periodic_tasks(&self) {
        let tasks = self.inner.periodic.lock().await.clone();
        for (name, period, task) in tasks {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    if let Err(err) = task().await {
                        warn!(task = %name, %err, "periodic task failed");
                    }
                }
            });
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! An in-memory stand-in for [`raft::RaftNetwork`] that wires a handful of
//! [`Raft`] cores together directly, skipping the stdio node runtime
//! entirely. Nodes can be isolated to simulate a network partition.

#![allow(dead_code)]

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use raft::AppendEntriesRequest;
use raft::AppendEntriesResponse;
use raft::ClientOp;
use raft::Config;
use raft::NodeId;
use raft::Raft;
use raft::RaftMetrics;
use raft::RaftNetwork;
use raft::Role;
use raft::VoteRequest;
use raft::VoteResponse;
use raft_kv::op::KvResponse;
use raft_kv::op::Op;
use raft_kv::state_machine::KvStateMachine;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

/// A router shared by every node in a cluster: it looks up the target's
/// [`Raft`] handle and calls straight into it, and records client replies
/// keyed by `msg_id` so tests can poll for them.
pub struct Router {
    peers: RwLock<HashMap<NodeId, Raft<KvStateMachine>>>,
    isolated: RwLock<HashSet<NodeId>>,
    replies: Mutex<HashMap<u64, KvResponse>>,
}

impl Router {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: RwLock::new(HashMap::new()),
            isolated: RwLock::new(HashSet::new()),
            replies: Mutex::new(HashMap::new()),
        })
    }

    pub async fn isolate(&self, id: &str) {
        self.isolated.write().await.insert(id.to_string());
    }

    pub async fn heal(&self, id: &str) {
        self.isolated.write().await.remove(id);
    }

    pub async fn reply_for(&self, msg_id: u64) -> Option<KvResponse> {
        self.replies.lock().await.get(&msg_id).cloned()
    }

    async fn is_reachable(&self, a: &str, b: &str) -> bool {
        let isolated = self.isolated.read().await;
        !isolated.contains(a) && !isolated.contains(b)
    }
}

/// One [`RaftNetwork`] per node, sharing the cluster's [`Router`].
pub struct RouterLink {
    id: NodeId,
    router: Arc<Router>,
}

#[async_trait]
impl RaftNetwork<KvStateMachine> for RouterLink {
    async fn append_entries(
        &self,
        target: &NodeId,
        rpc: AppendEntriesRequest<ClientOp<Op>>,
    ) -> anyhow::Result<AppendEntriesResponse> {
        if !self.router.is_reachable(&self.id, target).await {
            anyhow::bail!("{target} unreachable from {}", self.id);
        }
        let peers = self.router.peers.read().await;
        let raft = peers.get(target).ok_or_else(|| anyhow::anyhow!("unknown peer {target}"))?;
        raft.append_entries(rpc).await.map_err(Into::into)
    }

    async fn request_vote(&self, target: &NodeId, rpc: VoteRequest) -> anyhow::Result<VoteResponse> {
        if !self.router.is_reachable(&self.id, target).await {
            anyhow::bail!("{target} unreachable from {}", self.id);
        }
        let peers = self.router.peers.read().await;
        let raft = peers.get(target).ok_or_else(|| anyhow::anyhow!("unknown peer {target}"))?;
        Ok(raft.request_vote(rpc).await)
    }

    fn reply_to_client(&self, _dest: &NodeId, in_reply_to: Option<u64>, response: &KvResponse) {
        let Some(msg_id) = in_reply_to else { return };
        let router = self.router.clone();
        let response = response.clone();
        tokio::spawn(async move {
            router.replies.lock().await.insert(msg_id, response);
        });
    }
}

/// A running cluster of `n` nodes, named `"n0".."n{n-1}"`.
pub struct Cluster {
    pub router: Arc<Router>,
    pub nodes: HashMap<NodeId, Raft<KvStateMachine>>,
}

impl Cluster {
    pub async fn new(n: usize) -> Self {
        let ids: Vec<NodeId> = (0..n).map(|i| format!("n{i}")).collect();
        let router = Router::new();
        let mut nodes = HashMap::new();

        for id in &ids {
            let others: Vec<NodeId> = ids.iter().filter(|peer| *peer != id).cloned().collect();
            let link = Arc::new(RouterLink { id: id.clone(), router: router.clone() });
            let raft = Raft::spawn(id.clone(), others, Config::default(), link, Arc::new(KvStateMachine::new()));
            nodes.insert(id.clone(), raft);
        }

        {
            let mut peers = router.peers.write().await;
            for (id, raft) in &nodes {
                peers.insert(id.clone(), raft.clone());
            }
        }

        Self { router, nodes }
    }

    pub fn node(&self, id: &str) -> &Raft<KvStateMachine> {
        self.nodes.get(id).unwrap_or_else(|| panic!("no such node {id}"))
    }

    pub async fn metrics(&self, id: &str) -> RaftMetrics {
        self.node(id).metrics().borrow().clone()
    }

    pub async fn leader(&self) -> Option<NodeId> {
        for id in self.nodes.keys() {
            if self.metrics(id).await.role == Role::Leader {
                return Some(id.clone());
            }
        }
        None
    }

    /// Advances the paused clock in small steps, yielding between each so
    /// spawned replication/election tasks actually get to run.
    pub async fn tick(&self, total: Duration) {
        let step = Duration::from_millis(20);
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            tokio::time::advance(step).await;
            tokio::task::yield_now().await;
            elapsed += step;
        }
    }

    /// Ticks until a leader exists or `timeout` elapses.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<NodeId> {
        self.wait_for_leader_excluding(&[], timeout).await
    }

    /// Ticks until some node outside `exclude` reports itself as leader.
    /// Needed after isolating nodes: an isolated former leader keeps
    /// believing it is leader until its stepdown deadline passes, so a
    /// plain scan could return it before it notices it lost the majority.
    pub async fn wait_for_leader_excluding(&self, exclude: &[&str], timeout: Duration) -> Option<NodeId> {
        let step = Duration::from_millis(20);
        let mut elapsed = Duration::ZERO;
        while elapsed < timeout {
            for id in self.nodes.keys() {
                if !exclude.contains(&id.as_str()) && self.metrics(id).await.role == Role::Leader {
                    return Some(id.clone());
                }
            }
            tokio::time::advance(step).await;
            tokio::task::yield_now().await;
            elapsed += step;
        }
        None
    }

    /// Issues a client op against `target`, returning the eventual reply
    /// once some node applies the entry and calls back with `msg_id`.
    pub async fn client_op(&self, target: &str, msg_id: u64, op: Op) -> KvResponse {
        let client_op = ClientOp { src: "client".to_string(), msg_id: Some(msg_id), op };
        let mut current = target.to_string();
        for _ in 0..self.nodes.len() + 1 {
            match self.node(&current).client_write(client_op.clone()).await {
                Ok(()) => break,
                Err(raft::ClientWriteError::NotLeader(Some(leader))) => current = leader,
                Err(raft::ClientWriteError::NotLeader(None)) => {
                    self.tick(Duration::from_millis(200)).await;
                }
                Err(raft::ClientWriteError::ShuttingDown) => panic!("node shut down mid-test"),
            }
        }

        for _ in 0..200 {
            if let Some(response) = self.router.reply_for(msg_id).await {
                return response;
            }
            self.tick(Duration::from_millis(50)).await;
        }
        panic!("client op {msg_id} never got a reply");
    }
}

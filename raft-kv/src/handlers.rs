//! Request handlers registered with the node runtime. Raft RPCs are thin
//! shims onto the core; client ops route per §4.5: append-and-defer when
//! leader, relay when a leader is known, fail otherwise.

use std::sync::Arc;

use node::Body;
use node::Message;
use node::Node;
use node::RpcError;
use raft::AppendEntriesRequest;
use raft::ClientOp;
use raft::ClientWriteError;
use raft::Entry;
use raft::Raft;
use raft::VoteRequest;
use tokio::sync::OnceCell;

use crate::network::NodeNetwork;
use crate::op::Op;
use crate::state_machine::KvStateMachine;

#[derive(Clone)]
pub struct App {
    pub node: Node,
    pub state_machine: Arc<KvStateMachine>,
    raft: Arc<OnceCell<Raft<KvStateMachine>>>,
}

impl App {
    pub fn new(node: Node, state_machine: Arc<KvStateMachine>) -> Self {
        Self {
            node,
            state_machine,
            raft: Arc::new(OnceCell::new()),
        }
    }

    /// Built lazily on first use: by the time any handler runs, `init` has
    /// already completed, so `node.id()`/`node.other_node_ids()` are valid.
    async fn raft(&self) -> Raft<KvStateMachine> {
        self.raft
            .get_or_init(|| async {
                let network = Arc::new(NodeNetwork::new(self.node.clone()));
                Raft::spawn(
                    self.node.id(),
                    self.node.other_node_ids(),
                    raft::Config::default(),
                    network,
                    self.state_machine.clone(),
                )
            })
            .await
            .clone()
    }

    /// A snapshot of this node's Raft role/term/commit state, mostly useful
    /// for tests that need to wait for a stable leader.
    pub async fn metrics(&self) -> raft::RaftMetrics {
        self.raft().await.metrics().borrow().clone()
    }

    pub async fn handle_client_op(&self, msg: Message) -> Result<(), RpcError> {
        let op = parse_op(&msg)?;
        let client_op = ClientOp {
            src: msg.src.clone(),
            msg_id: msg.body.msg_id,
            op,
        };

        match self.raft().await.client_write(client_op).await {
            Ok(()) => Ok(()),
            Err(ClientWriteError::NotLeader(Some(leader))) => {
                let forwarded = Message::new(msg.src.clone(), leader, msg.body.clone());
                self.node.send(&forwarded).await;
                Ok(())
            }
            Err(ClientWriteError::NotLeader(None)) => Err(RpcError::temporarily_unavailable("no leader known")),
            Err(ClientWriteError::ShuttingDown) => Err(RpcError::crash("raft core is shutting down")),
        }
    }

    pub async fn handle_request_vote(&self, msg: Message) -> Result<(), RpcError> {
        let rpc = VoteRequest {
            term: msg.body.require("term").map_err(RpcError::malformed_request)?,
            candidate_id: msg.body.require("candidate_id").map_err(RpcError::malformed_request)?,
            last_log_index: msg.body.require("last_log_index").map_err(RpcError::malformed_request)?,
            last_log_term: msg.body.require("last_log_term").map_err(RpcError::malformed_request)?,
        };
        let resp = self.raft().await.request_vote(rpc).await;
        let body = Body::new("request_vote_res").with("term", resp.term).with("vote_granted", resp.vote_granted);
        self.node.reply(&msg, body).await;
        Ok(())
    }

    pub async fn handle_append_entries(&self, msg: Message) -> Result<(), RpcError> {
        let entries: Vec<Entry<ClientOp<Op>>> = msg.body.require("entries").map_err(RpcError::malformed_request)?;
        let rpc = AppendEntriesRequest {
            term: msg.body.require("term").map_err(RpcError::malformed_request)?,
            leader_id: msg.body.require("leader_id").map_err(RpcError::malformed_request)?,
            prev_log_index: msg.body.require("prev_log_index").map_err(RpcError::malformed_request)?,
            prev_log_term: msg.body.require("prev_log_term").map_err(RpcError::malformed_request)?,
            entries,
            leader_commit: msg.body.require("leader_commit").map_err(RpcError::malformed_request)?,
        };
        let resp = self
            .raft()
            .await
            .append_entries(rpc)
            .await
            .map_err(|err| RpcError::abort(err.to_string()))?;
        let body = Body::new("append_entries_res").with("term", resp.term).with("success", resp.success);
        self.node.reply(&msg, body).await;
        Ok(())
    }
}

fn parse_op(msg: &Message) -> Result<Op, RpcError> {
    match msg.body.typ.as_str() {
        "read" => Ok(Op::Read {
            key: msg.body.require("key").map_err(RpcError::malformed_request)?,
        }),
        "write" => Ok(Op::Write {
            key: msg.body.require("key").map_err(RpcError::malformed_request)?,
            value: msg.body.require("value").map_err(RpcError::malformed_request)?,
        }),
        "cas" => Ok(Op::Cas {
            key: msg.body.require("key").map_err(RpcError::malformed_request)?,
            from: msg.body.require("from").map_err(RpcError::malformed_request)?,
            to: msg.body.require("to").map_err(RpcError::malformed_request)?,
        }),
        other => Err(RpcError::not_supported(format!("unsupported op `{other}`"))),
    }
}

//! The handle application code actually holds: a cheap, cloneable front for
//! the actor task spawned by [`Raft::spawn`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;

use crate::config::Config;
use crate::core::RaftCore;
use crate::core::RaftMsg;
use crate::error::AppendEntriesError;
use crate::error::ClientWriteError;
use crate::metrics::RaftMetrics;
use crate::network::RaftNetwork;
use crate::rpc::AppendEntriesRequest;
use crate::rpc::AppendEntriesResponse;
use crate::rpc::VoteRequest;
use crate::rpc::VoteResponse;
use crate::state_machine::StateMachine;
use crate::types::ClientOp;
use crate::types::NodeId;

pub struct Raft<M: StateMachine> {
    tx_api: mpsc::UnboundedSender<RaftMsg<M>>,
    rx_metrics: watch::Receiver<RaftMetrics>,
}

impl<M: StateMachine> Clone for Raft<M> {
    fn clone(&self) -> Self {
        Self {
            tx_api: self.tx_api.clone(),
            rx_metrics: self.rx_metrics.clone(),
        }
    }
}

impl<M: StateMachine> Raft<M> {
    pub fn spawn<N: RaftNetwork<M>>(id: NodeId, peers: Vec<NodeId>, config: Config, network: Arc<N>, state_machine: Arc<M>) -> Self {
        let (tx_api, rx_api) = mpsc::unbounded_channel();
        let (tx_metrics, rx_metrics) = watch::channel(RaftMetrics::new(id.clone()));
        let core = RaftCore::new(id, peers, config, network, state_machine, rx_api, tx_metrics);
        tokio::spawn(core.run());
        Self { tx_api, rx_metrics }
    }

    pub async fn append_entries(
        &self,
        rpc: AppendEntriesRequest<ClientOp<M::Op>>,
    ) -> Result<AppendEntriesResponse, AppendEntriesError> {
        let fallback = Ok(AppendEntriesResponse { term: rpc.term, success: false });
        let (tx, rx) = oneshot::channel();
        if self.tx_api.send(RaftMsg::AppendEntries { rpc, tx }).is_err() {
            return fallback;
        }
        rx.await.unwrap_or(fallback)
    }

    pub async fn request_vote(&self, rpc: VoteRequest) -> VoteResponse {
        let fallback = VoteResponse { term: rpc.term, vote_granted: false };
        let (tx, rx) = oneshot::channel();
        if self.tx_api.send(RaftMsg::RequestVote { rpc, tx }).is_err() {
            return fallback;
        }
        rx.await.unwrap_or(fallback)
    }

    /// Appends `op` to the log if this node is currently leader. Does not
    /// wait for the entry to commit: the eventual reply to the client is
    /// emitted later, by whichever node is leader when the entry applies,
    /// via [`RaftNetwork::reply_to_client`].
    pub async fn client_write(&self, op: ClientOp<M::Op>) -> Result<(), ClientWriteError> {
        let (tx, rx) = oneshot::channel();
        if self.tx_api.send(RaftMsg::ClientWrite { op, tx }).is_err() {
            return Err(ClientWriteError::ShuttingDown);
        }
        rx.await.unwrap_or(Err(ClientWriteError::ShuttingDown))
    }

    pub fn metrics(&self) -> watch::Receiver<RaftMetrics> {
        self.rx_metrics.clone()
    }
}

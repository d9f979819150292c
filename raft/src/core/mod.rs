//! The actor: one task owns all Raft state and processes every RPC, client
//! write, and timer tick serially. This replaces the source's re-entrant
//! mutex with the refactor its own design notes recommend — a single
//! consumer draining a message queue needs no lock at all.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::error::AppendEntriesError;
use crate::error::ClientWriteError;
use crate::log::Entry;
use crate::log::Log;
use crate::metrics::RaftMetrics;
use crate::metrics::Role;
use crate::network::RaftNetwork;
use crate::rpc::AppendEntriesRequest;
use crate::rpc::AppendEntriesResponse;
use crate::rpc::VoteRequest;
use crate::rpc::VoteResponse;
use crate::state_machine::StateMachine;
use crate::types::majority;
use crate::types::ClientOp;
use crate::types::LogIndex;
use crate::types::NodeId;
use crate::types::Term;

pub(crate) enum RaftMsg<M: StateMachine> {
    AppendEntries {
        rpc: AppendEntriesRequest<ClientOp<M::Op>>,
        tx: oneshot::Sender<Result<AppendEntriesResponse, AppendEntriesError>>,
    },
    RequestVote {
        rpc: VoteRequest,
        tx: oneshot::Sender<VoteResponse>,
    },
    ClientWrite {
        op: ClientOp<M::Op>,
        tx: oneshot::Sender<Result<(), ClientWriteError>>,
    },
}

struct ReplicationReply {
    peer: NodeId,
    ni: LogIndex,
    len: LogIndex,
    resp: AppendEntriesResponse,
}

type VoteFuture = BoxFuture<'static, (NodeId, anyhow::Result<VoteResponse>)>;

pub(crate) struct RaftCore<N, M: StateMachine> {
    id: NodeId,
    peers: Vec<NodeId>,
    config: Config,
    network: Arc<N>,
    state_machine: Arc<M>,

    role: Role,
    current_term: Term,
    voted_for: Option<NodeId>,
    log: Log<ClientOp<M::Op>>,
    commit_index: LogIndex,
    last_applied: LogIndex,
    current_leader: Option<NodeId>,

    election_deadline: f64,
    stepdown_deadline: f64,
    last_replication: f64,

    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,

    votes_pending: Option<FuturesUnordered<VoteFuture>>,
    votes_received: HashSet<NodeId>,
    votes_term: Term,

    started_at: Instant,
    rx_api: mpsc::UnboundedReceiver<RaftMsg<M>>,
    repl_tx: mpsc::UnboundedSender<ReplicationReply>,
    repl_rx: mpsc::UnboundedReceiver<ReplicationReply>,
    tx_metrics: watch::Sender<RaftMetrics>,
}

impl<N, M> RaftCore<N, M>
where
    N: RaftNetwork<M>,
    M: StateMachine,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: NodeId,
        peers: Vec<NodeId>,
        config: Config,
        network: Arc<N>,
        state_machine: Arc<M>,
        rx_api: mpsc::UnboundedReceiver<RaftMsg<M>>,
        tx_metrics: watch::Sender<RaftMetrics>,
    ) -> Self {
        let (repl_tx, repl_rx) = mpsc::unbounded_channel();
        Self {
            id,
            peers,
            config,
            network,
            state_machine,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            commit_index: 0,
            last_applied: 1,
            current_leader: None,
            election_deadline: 0.0,
            stepdown_deadline: 0.0,
            last_replication: 0.0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes_pending: None,
            votes_received: HashSet::new(),
            votes_term: 0,
            started_at: Instant::now(),
            rx_api,
            repl_tx,
            repl_rx,
            tx_metrics,
        }
    }

    fn now(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub(crate) async fn run(mut self) {
        self.reset_election_deadline();
        self.publish_metrics();

        let mut election_check = Box::pin(tokio::time::sleep(self.config.election_check_period()));
        let mut heartbeat_check = tokio::time::interval(Duration::from_secs_f64(self.config.heartbeat_interval));
        heartbeat_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut replication_tick = tokio::time::interval(Duration::from_secs_f64(self.config.min_replication_interval));
        replication_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = election_check.as_mut() => {
                    self.on_election_check();
                    let period = self.config.election_check_period();
                    election_check.as_mut().reset(Instant::now() + period);
                }
                _ = heartbeat_check.tick() => {
                    self.on_heartbeat_check();
                }
                _ = replication_tick.tick() => {
                    self.replicate_log();
                }
                vote = Self::next_vote(&mut self.votes_pending), if self.votes_pending.is_some() => {
                    match vote {
                        Some((peer, result)) => self.handle_vote_reply(peer, result),
                        None => self.votes_pending = None,
                    }
                }
                Some(reply) = self.repl_rx.recv() => {
                    self.handle_replication_reply(reply).await;
                }
                msg = self.rx_api.recv() => {
                    match msg {
                        Some(msg) => self.handle_api_msg(msg).await,
                        None => break,
                    }
                }
            }
            self.publish_metrics();
        }
    }

    async fn next_vote(pending: &mut Option<FuturesUnordered<VoteFuture>>) -> Option<(NodeId, anyhow::Result<VoteResponse>)> {
        match pending {
            Some(futures) => futures.next().await,
            None => std::future::pending().await,
        }
    }

    fn publish_metrics(&self) {
        let _ = self.tx_metrics.send(RaftMetrics {
            id: self.id.clone(),
            role: self.role,
            current_term: self.current_term,
            current_leader: self.current_leader.clone(),
            commit_index: self.commit_index,
            last_applied: self.last_applied,
        });
    }

    async fn handle_api_msg(&mut self, msg: RaftMsg<M>) {
        match msg {
            RaftMsg::AppendEntries { rpc, tx } => {
                let resp = self.handle_append_entries(rpc).await;
                let _ = tx.send(resp);
            }
            RaftMsg::RequestVote { rpc, tx } => {
                let resp = self.handle_request_vote(rpc);
                let _ = tx.send(resp);
            }
            RaftMsg::ClientWrite { op, tx } => {
                let result = self.handle_client_write(op);
                let _ = tx.send(result);
            }
        }
    }

    fn handle_client_write(&mut self, op: ClientOp<M::Op>) -> Result<(), ClientWriteError> {
        if self.role == Role::Leader {
            self.log.append([Entry {
                term: self.current_term,
                op: Some(op),
            }]);
            Ok(())
        } else {
            Err(ClientWriteError::NotLeader(self.current_leader.clone()))
        }
    }

    fn handle_request_vote(&mut self, rpc: VoteRequest) -> VoteResponse {
        self.maybe_step_down(rpc.term);

        let grant = if rpc.term < self.current_term {
            false
        } else if self.voted_for.as_deref().is_some_and(|v| v != rpc.candidate_id) {
            false
        } else {
            self.challenger_up_to_date(rpc.last_log_term, rpc.last_log_index)
        };

        if grant {
            self.voted_for = Some(rpc.candidate_id.clone());
            tracing::info!(term = self.current_term, candidate = %rpc.candidate_id, "granting vote");
        }

        VoteResponse {
            term: self.current_term,
            vote_granted: grant,
        }
    }

    fn challenger_up_to_date(&self, last_log_term: Term, last_log_index: LogIndex) -> bool {
        let ours = self.log.last();
        if last_log_term != ours.term {
            last_log_term > ours.term
        } else {
            last_log_index >= self.log.size()
        }
    }

    async fn handle_append_entries(
        &mut self,
        rpc: AppendEntriesRequest<ClientOp<M::Op>>,
    ) -> Result<AppendEntriesResponse, AppendEntriesError> {
        self.maybe_step_down(rpc.term);

        if rpc.term < self.current_term {
            return Ok(AppendEntriesResponse {
                term: self.current_term,
                success: false,
            });
        }

        self.reset_election_deadline();

        if rpc.prev_log_index == 0 {
            return Err(AppendEntriesError(format!("out of bounds previous log index {}", rpc.prev_log_index)));
        }

        match self.log.get(rpc.prev_log_index) {
            Some(prev) if prev.term == rpc.prev_log_term => {
                self.log.truncate(rpc.prev_log_index);
                self.log.append(rpc.entries);
                if self.commit_index < rpc.leader_commit {
                    self.commit_index = self.log.size().min(rpc.leader_commit);
                }
                self.apply_committed().await;
                Ok(AppendEntriesResponse {
                    term: self.current_term,
                    success: true,
                })
            }
            _ => {
                self.current_leader = Some(rpc.leader_id);
                Ok(AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                })
            }
        }
    }

    async fn apply_committed(&mut self) {
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let idx = self.last_applied;
            let Some(entry) = self.log.get(idx).cloned() else {
                break;
            };
            let Some(client_op) = entry.op else { continue };
            let response = self.state_machine.apply(&client_op.op).await;
            if self.role == Role::Leader {
                self.network.reply_to_client(&client_op.src, client_op.msg_id, &response);
            }
        }
    }

    fn on_election_check(&mut self) {
        if self.now() > self.election_deadline {
            if self.role != Role::Leader {
                self.become_candidate();
            } else {
                self.reset_election_deadline();
            }
        }
    }

    fn on_heartbeat_check(&mut self) {
        if self.role == Role::Leader && self.now() > self.stepdown_deadline {
            tracing::info!("stepping down, no acks from a majority recently");
            self.become_follower();
        }
    }

    fn become_candidate(&mut self) {
        self.role = Role::Candidate;
        self.advance_term(self.current_term + 1);
        self.voted_for = Some(self.id.clone());
        self.current_leader = None;
        self.reset_election_deadline();
        self.reset_stepdown_deadline();
        tracing::info!(term = self.current_term, "became candidate for term {}", self.current_term);
        self.request_votes();
    }

    fn request_votes(&mut self) {
        let term = self.current_term;
        self.votes_term = term;
        self.votes_received = HashSet::new();
        self.votes_received.insert(self.id.clone());

        let rpc = VoteRequest {
            term,
            candidate_id: self.id.clone(),
            last_log_index: self.log.size(),
            last_log_term: self.log.last().term,
        };

        let futures = FuturesUnordered::new();
        for peer in self.peers.clone() {
            let network = self.network.clone();
            let rpc = rpc.clone();
            futures.push(Box::pin(async move {
                let result = network.request_vote(&peer, rpc).await;
                (peer, result)
            }) as VoteFuture);
        }
        self.votes_pending = if futures.is_empty() { None } else { Some(futures) };

        if self.votes_received.len() >= majority(self.peers.len() + 1) {
            self.become_leader();
        }
    }

    fn handle_vote_reply(&mut self, peer: NodeId, result: anyhow::Result<VoteResponse>) {
        self.reset_stepdown_deadline();
        let Ok(resp) = result else { return };
        self.maybe_step_down(resp.term);
        if self.role != Role::Candidate || self.current_term != self.votes_term || resp.term != self.votes_term {
            return;
        }
        if resp.vote_granted {
            self.votes_received.insert(peer);
            if self.votes_received.len() >= majority(self.peers.len() + 1) {
                self.become_leader();
            }
        }
    }

    fn become_leader(&mut self) {
        if self.role != Role::Candidate {
            return;
        }
        self.next_index.clear();
        self.match_index.clear();
        for peer in self.peers.clone() {
            self.next_index.insert(peer.clone(), self.log.size() + 1);
            self.match_index.insert(peer, 0);
        }
        self.current_leader = None;
        self.role = Role::Leader;
        self.last_replication = 0.0;
        self.votes_pending = None;
        self.reset_stepdown_deadline();
        tracing::info!(term = self.current_term, "became leader for term {}", self.current_term);
    }

    fn become_follower(&mut self) {
        self.role = Role::Follower;
        self.next_index.clear();
        self.match_index.clear();
        self.current_leader = None;
        self.votes_pending = None;
        self.reset_election_deadline();
        tracing::info!("became follower");
    }

    fn maybe_step_down(&mut self, remote_term: Term) {
        if remote_term > self.current_term {
            tracing::info!(remote_term, current_term = self.current_term, "observed higher term, stepping down");
            self.advance_term(remote_term);
            self.become_follower();
        }
    }

    fn advance_term(&mut self, term: Term) {
        debug_assert!(term >= self.current_term);
        self.current_term = term;
        self.voted_for = None;
    }

    fn replicate_log(&mut self) {
        if self.role != Role::Leader {
            return;
        }
        let elapsed = self.now() - self.last_replication;
        if elapsed < self.config.min_replication_interval {
            return;
        }

        let term = self.current_term;
        let mut replicated = false;
        for peer in self.peers.clone() {
            let ni = self.next_index[&peer];
            let entries = self.log.from_index(ni);
            if entries.is_empty() && elapsed < self.config.heartbeat_interval {
                continue;
            }
            replicated = true;

            let prev_log_index = ni - 1;
            let prev_log_term = self.log.get(prev_log_index).map(|e| e.term).unwrap_or(0);
            let len = entries.len() as LogIndex;
            let rpc = AppendEntriesRequest {
                term,
                leader_id: self.id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.commit_index,
            };

            let network = self.network.clone();
            let tx = self.repl_tx.clone();
            tokio::spawn(async move {
                if let Ok(resp) = network.append_entries(&peer, rpc).await {
                    let _ = tx.send(ReplicationReply { peer, ni, len, resp });
                }
            });
        }

        if replicated {
            self.last_replication = self.now();
        }
    }

    async fn handle_replication_reply(&mut self, reply: ReplicationReply) {
        self.maybe_step_down(reply.resp.term);
        if self.role != Role::Leader {
            return;
        }
        self.reset_stepdown_deadline();
        if reply.resp.success {
            if let Some(next) = self.next_index.get_mut(&reply.peer) {
                *next = (*next).max(reply.ni + reply.len);
            }
            if let Some(matched) = self.match_index.get_mut(&reply.peer) {
                *matched = (*matched).max(reply.ni + reply.len - 1);
            }
            self.advance_commit_index().await;
        } else if let Some(next) = self.next_index.get_mut(&reply.peer) {
            *next = next.saturating_sub(1).max(1);
        }
    }

    async fn advance_commit_index(&mut self) {
        if self.role == Role::Leader {
            let mut matched: Vec<LogIndex> = self.match_index.values().copied().collect();
            matched.push(self.log.size());
            matched.sort_unstable();
            let idx = matched[matched.len() - majority(matched.len())];
            if idx > self.commit_index {
                if let Some(entry) = self.log.get(idx) {
                    if entry.term == self.current_term {
                        tracing::info!(commit_index = idx, "advancing commit index");
                        self.commit_index = idx;
                    }
                }
            }
        }
        self.apply_committed().await;
    }

    fn reset_election_deadline(&mut self) {
        self.election_deadline = self.config.election_deadline(self.now());
    }

    fn reset_stepdown_deadline(&mut self) {
        self.stepdown_deadline = self.config.stepdown_deadline(self.now());
    }
}

//! Wire shapes for the two inter-node Raft RPCs.

use serde::Deserialize;
use serde::Serialize;

use crate::log::Entry;
use crate::types::LogIndex;
use crate::types::NodeId;
use crate::types::Term;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest<Op> {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<Entry<Op>>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

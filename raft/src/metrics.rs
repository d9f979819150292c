use serde::Serialize;

use crate::types::LogIndex;
use crate::types::NodeId;
use crate::types::Term;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A snapshot of the core's state, published after every actor step so a
/// node can log transitions or expose them without reaching into the actor.
#[derive(Debug, Clone, Serialize)]
pub struct RaftMetrics {
    pub id: NodeId,
    pub role: Role,
    pub current_term: Term,
    pub current_leader: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
}

impl RaftMetrics {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            role: Role::Follower,
            current_term: 0,
            current_leader: None,
            commit_index: 0,
            last_applied: 1,
        }
    }
}

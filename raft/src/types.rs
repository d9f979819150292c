//! Shared scalar types and the client envelope carried alongside each op in the log.

use serde::Deserialize;
use serde::Serialize;

pub type NodeId = String;
pub type Term = u64;
pub type LogIndex = u64;

/// An application-level op tagged with the requester's identity, so that
/// whichever node ends up applying the entry (not necessarily the one that
/// first accepted it) knows who to reply to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOp<Op> {
    pub src: NodeId,
    pub msg_id: Option<u64>,
    pub op: Op,
}

pub(crate) fn majority(n: usize) -> usize {
    n / 2 + 1
}

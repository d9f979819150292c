use crate::types::NodeId;

/// Returned when an inbound `AppendEntries` RPC is malformed enough to
/// reject outright rather than answer with a normal `success: false`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct AppendEntriesError(pub String);

/// Returned when a client op can't be appended locally right now.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientWriteError {
    /// Not the leader. Carries the last observed leader, if any, so the
    /// caller can forward the request there instead of failing outright.
    #[error("not leader, last known leader: {0:?}")]
    NotLeader(Option<NodeId>),
    /// The core's actor task is gone.
    #[error("raft core is shutting down")]
    ShuttingDown,
}

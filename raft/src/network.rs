//! The transport seam. A binary wires this up to whatever RPC mechanism it
//! actually has (here, the Maelstrom-style node runtime); the core only
//! ever sees these three operations.

use async_trait::async_trait;

use crate::rpc::AppendEntriesRequest;
use crate::rpc::AppendEntriesResponse;
use crate::rpc::VoteRequest;
use crate::rpc::VoteResponse;
use crate::state_machine::StateMachine;
use crate::types::ClientOp;
use crate::types::NodeId;

#[async_trait]
pub trait RaftNetwork<M: StateMachine>: Send + Sync + 'static {
    async fn append_entries(
        &self,
        target: &NodeId,
        rpc: AppendEntriesRequest<ClientOp<M::Op>>,
    ) -> anyhow::Result<AppendEntriesResponse>;

    async fn request_vote(&self, target: &NodeId, rpc: VoteRequest) -> anyhow::Result<VoteResponse>;

    /// Fire-and-forget reply to a client whose op has just been applied.
    /// `in_reply_to` is the msg_id the client's original request carried, if any.
    fn reply_to_client(&self, dest: &NodeId, in_reply_to: Option<u64>, response: &M::Response);
}

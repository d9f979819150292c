//! Wires `raft::RaftNetwork` onto the stdio node runtime: Raft RPCs go out
//! through `Node::rpc`'s callback registration, and a client reply is just
//! a fire-and-forget send. Neither has a hard timeout — a peer that never
//! answers just leaves the registration pending, and the next heartbeat or
//! election tick issues a fresh RPC regardless.

use async_trait::async_trait;
use node::Body;
use node::Message;
use node::Node;
use raft::AppendEntriesRequest;
use raft::AppendEntriesResponse;
use raft::ClientOp;
use raft::NodeId;
use raft::RaftNetwork;
use raft::VoteRequest;
use raft::VoteResponse;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::op::KvResponse;
use crate::op::Op;
use crate::state_machine::KvStateMachine;

pub struct NodeNetwork {
    node: Node,
}

impl NodeNetwork {
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    /// Sends `body` to `target` and resolves once the matching reply
    /// arrives, however long that takes. Mirrors `Node::rpc`'s callback
    /// into a future so `RaftNetwork`'s async-fn shape is preserved.
    async fn call(&self, target: &NodeId, body: Body) -> anyhow::Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.node.rpc(target, body, move |reply| {
            let _ = tx.send(reply);
        });
        rx.await.map_err(|_| anyhow::anyhow!("{target} dropped the RPC without replying"))
    }
}

#[async_trait]
impl RaftNetwork<KvStateMachine> for NodeNetwork {
    async fn append_entries(
        &self,
        target: &NodeId,
        rpc: AppendEntriesRequest<ClientOp<Op>>,
    ) -> anyhow::Result<AppendEntriesResponse> {
        let body = body_from("append_entries", &rpc);
        let reply = self.call(target, body).await?;
        parse_payload(&reply.body)
    }

    async fn request_vote(&self, target: &NodeId, rpc: VoteRequest) -> anyhow::Result<VoteResponse> {
        let body = body_from("request_vote", &rpc);
        let reply = self.call(target, body).await?;
        parse_payload(&reply.body)
    }

    fn reply_to_client(&self, dest: &NodeId, in_reply_to: Option<u64>, response: &KvResponse) {
        let mut body = kv_response_body(response);
        body.in_reply_to = in_reply_to;
        let node = self.node.clone();
        let msg = Message::new(node.id(), dest.clone(), body);
        tokio::spawn(async move { node.send(&msg).await });
    }
}

fn body_from<T: Serialize>(typ: &str, payload: &T) -> Body {
    let mut body = Body::new(typ);
    if let Ok(Value::Object(map)) = serde_json::to_value(payload) {
        body.extra = map;
    }
    body
}

fn parse_payload<T: DeserializeOwned>(body: &Body) -> anyhow::Result<T> {
    let value = Value::Object(body.extra.clone());
    serde_json::from_value(value).map_err(|err| anyhow::anyhow!("malformed {}: {err}", body.typ))
}

pub fn kv_response_body(response: &KvResponse) -> Body {
    match response {
        KvResponse::ReadOk { value } => Body::new("read_ok").with("value", value),
        KvResponse::WriteOk => Body::new("write_ok"),
        KvResponse::CasOk => Body::new("cas_ok"),
        KvResponse::Error { code, text } => Body::new("error").with("code", *code).with("text", text.clone()),
    }
}

//! Entry point for the replicated key/value store: wires the node runtime's
//! handlers to a [`raft::Raft`] core over [`raft_kv::state_machine::KvStateMachine`],
//! then runs the dispatcher to stdin EOF.

use std::sync::Arc;

use node::Node;
use raft_kv::handlers::App;
use raft_kv::state_machine::KvStateMachine;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let node = Node::new();
    let app = App::new(node.clone(), Arc::new(KvStateMachine::new()));

    for typ in ["read", "write", "cas"] {
        let app = app.clone();
        node.register_handler(typ, move |msg| {
            let app = app.clone();
            async move { app.handle_client_op(msg).await }
        });
    }

    {
        let app = app.clone();
        node.register_handler("request_vote", move |msg| {
            let app = app.clone();
            async move { app.handle_request_vote(msg).await }
        });
    }

    {
        let app = app.clone();
        node.register_handler("append_entries", move |msg| {
            let app = app.clone();
            async move { app.handle_append_entries(msg).await }
        });
    }

    node.run().await
}

//! A Raft consensus core built as a single-threaded actor: one task owns
//! all role/term/log state and processes RPCs, client writes, and timers
//! serially, so no state is ever touched from two call sites at once.

mod config;
mod core;
mod error;
mod log;
mod metrics;
mod network;
mod raft;
mod rpc;
mod state_machine;
mod types;

pub use config::Config;
pub use error::AppendEntriesError;
pub use error::ClientWriteError;
pub use log::Entry;
pub use metrics::RaftMetrics;
pub use metrics::Role;
pub use network::RaftNetwork;
pub use raft::Raft;
pub use rpc::AppendEntriesRequest;
pub use rpc::AppendEntriesResponse;
pub use rpc::VoteRequest;
pub use rpc::VoteResponse;
pub use state_machine::StateMachine;
pub use types::ClientOp;
pub use types::LogIndex;
pub use types::NodeId;
pub use types::Term;

pub mod handlers;
pub mod network;
pub mod op;
pub mod state_machine;

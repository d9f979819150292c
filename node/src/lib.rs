//! Line-delimited JSON-over-stdio node runtime shared by the Maelstrom-style
//! exercises: message dispatch, RPC correlation, periodic tasks, and the
//! numeric error taxonomy the harness expects on the wire.

mod error;
mod message;
mod runtime;

pub use error::ErrorCode;
pub use error::RpcError;
pub use message::Body;
pub use message::Message;
pub use runtime::Node;

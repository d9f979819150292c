//! The application the log exists to drive. Kept generic so the consensus
//! core has no opinion on what a committed entry actually means.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[async_trait]
pub trait StateMachine: Send + Sync + 'static {
    type Op: Clone + std::fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static;
    type Response: Clone + std::fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// Apply a committed op. Called in log order, exactly once per entry,
    /// identically on every node.
    async fn apply(&self, op: &Self::Op) -> Self::Response;
}

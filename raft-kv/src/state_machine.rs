//! The replicated map: `read`, `write`, `cas`. Writes are copy-on-write —
//! each mutation clones the current snapshot into a new `Arc`, rather than
//! mutating the map readers may still be holding — a clarity choice the
//! spec explicitly allows a mutable store to replace.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use node::ErrorCode;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::op::KvResponse;
use crate::op::Op;

pub struct KvStateMachine {
    data: Mutex<Arc<HashMap<String, Value>>>,
}

impl KvStateMachine {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Arc::new(HashMap::new())),
        }
    }
}

impl Default for KvStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl raft::StateMachine for KvStateMachine {
    type Op = Op;
    type Response = KvResponse;

    async fn apply(&self, op: &Op) -> KvResponse {
        let mut guard = self.data.lock().await;
        match op {
            Op::Read { key } => match guard.get(key) {
                Some(value) => KvResponse::ReadOk { value: value.clone() },
                None => key_does_not_exist(),
            },
            Op::Write { key, value } => {
                let mut next = (**guard).clone();
                next.insert(key.clone(), value.clone());
                *guard = Arc::new(next);
                KvResponse::WriteOk
            }
            Op::Cas { key, from, to } => match guard.get(key) {
                Some(current) if current == from => {
                    let mut next = (**guard).clone();
                    next.insert(key.clone(), to.clone());
                    *guard = Arc::new(next);
                    KvResponse::CasOk
                }
                Some(current) => KvResponse::Error {
                    code: ErrorCode::PreconditionFailed as u32,
                    text: format!("expected {from:?} but got {current:?}"),
                },
                None => key_does_not_exist(),
            },
        }
    }
}

fn key_does_not_exist() -> KvResponse {
    KvResponse::Error {
        code: ErrorCode::KeyDoesNotExist as u32,
        text: "key does not exist".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft::StateMachine;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let sm = KvStateMachine::new();
        sm.apply(&Op::Write { key: "x".into(), value: json!(1) }).await;
        let response = sm.apply(&Op::Read { key: "x".into() }).await;
        assert!(matches!(response, KvResponse::ReadOk { value } if value == json!(1)));
    }

    #[tokio::test]
    async fn read_on_missing_key_errors() {
        let sm = KvStateMachine::new();
        let response = sm.apply(&Op::Read { key: "missing".into() }).await;
        assert!(matches!(response, KvResponse::Error { code, .. } if code == ErrorCode::KeyDoesNotExist as u32));
    }

    #[tokio::test]
    async fn cas_succeeds_only_when_from_matches() {
        let sm = KvStateMachine::new();
        sm.apply(&Op::Write { key: "x".into(), value: json!(0) }).await;

        let ok = sm.apply(&Op::Cas { key: "x".into(), from: json!(0), to: json!(1) }).await;
        assert!(matches!(ok, KvResponse::CasOk));

        let conflict = sm.apply(&Op::Cas { key: "x".into(), from: json!(0), to: json!(2) }).await;
        assert!(matches!(conflict, KvResponse::Error { code, .. } if code == ErrorCode::PreconditionFailed as u32));

        let read = sm.apply(&Op::Read { key: "x".into() }).await;
        assert!(matches!(read, KvResponse::ReadOk { value } if value == json!(1)));
    }
}

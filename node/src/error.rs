//! The numeric error taxonomy wired into the harness protocol.

use serde::Serialize;

use crate::message::Body;

/// A structured error, reported to the harness as `{type: "error", code, text}`.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("({code}) {text}")]
pub struct RpcError {
    pub code: u32,
    pub text: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, text: impl Into<String>) -> Self {
        Self {
            code: code as u32,
            text: text.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "rpc timed out")
    }

    pub fn not_supported(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, text)
    }

    pub fn temporarily_unavailable(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::TemporarilyUnavailable, text)
    }

    pub fn malformed_request(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedRequest, text)
    }

    pub fn crash(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::Crash, text)
    }

    pub fn abort(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::Abort, text)
    }

    pub fn key_does_not_exist(key: &str) -> Self {
        Self::new(ErrorCode::KeyDoesNotExist, format!("key {key} does not exist"))
    }

    pub fn precondition_failed(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::PreconditionFailed, text)
    }

    pub fn txn_conflict(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::TxnConflict, text)
    }

    /// Render this error as a reply body of type `error`.
    pub fn into_body(self) -> Body {
        Body::new("error").with("code", self.code).with("text", self.text)
    }
}

/// The numeric codes the harness protocol assigns to each failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout = 0,
    NotSupported = 10,
    TemporarilyUnavailable = 11,
    MalformedRequest = 12,
    Crash = 13,
    Abort = 14,
    KeyDoesNotExist = 20,
    PreconditionFailed = 22,
    TxnConflict = 30,
}

//! The wire envelope: `{src, dest, body}` with `body` always carrying a `type`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// A single line of the newline-delimited JSON protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub src: String,
    pub dest: String,
    pub body: Body,
}

impl Message {
    pub fn new(src: impl Into<String>, dest: impl Into<String>, body: Body) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body,
        }
    }
}

/// A message body. `r#type`, `msg_id` and `in_reply_to` are the only fields
/// every exercise agrees on; everything else is application-specific and is
/// kept in `extra` via `#[serde(flatten)]` so handlers can add whatever
/// fields their operation needs without a new struct per message type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Body {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Body {
    pub fn new(typ: impl Into<String>) -> Self {
        Self {
            typ: typ.into(),
            msg_id: None,
            in_reply_to: None,
            extra: Map::new(),
        }
    }

    /// Attach an extra field, chainable: `Body::new("write").with("key", key)`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.extra.insert(key.to_string(), v);
        }
        self
    }

    /// Fetch and deserialize an extra field.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.extra.get(key).cloned().and_then(|v| serde_json::from_value(v).ok())
    }

    /// Fetch a required extra field, or a `malformed_request` description of what's missing.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, String> {
        self.get(key).ok_or_else(|| format!("missing or invalid field `{key}`"))
    }
}

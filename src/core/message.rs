//! Wire protocol shared by the pool and its workers.
//!
//! Messages are JSON objects tagged by `type`, one per line when carried over
//! a byte stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::job::JobId;

/// Reserved request kind used for the worker handshake.
pub const INIT_KIND: &str = "__init";

/// A message exchanged over a worker link, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A correlated request. A missing `kind` targets the default handler.
    Request {
        /// Correlation id, unique within the sender's id space.
        id: JobId,
        /// Handler name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        /// Request payload.
        #[serde(default)]
        payload: Value,
    },

    /// Reply to a previously received request.
    Reply {
        /// Correlation id of the request being answered.
        id: JobId,
        /// Successful result.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        /// Error text; takes precedence over `payload` when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Uncorrelated, fire-and-forget signal.
    Notification {
        /// Notification name.
        kind: String,
        /// Notification payload.
        #[serde(default)]
        payload: Value,
    },
}

impl Message {
    /// Create a request.
    pub fn request(id: JobId, kind: Option<String>, payload: Value) -> Self {
        Self::Request { id, kind, payload }
    }

    /// Create the handshake request carrying the entry module path.
    pub fn init(id: JobId, module: impl Into<String>) -> Self {
        Self::Request {
            id,
            kind: Some(INIT_KIND.to_string()),
            payload: Value::String(module.into()),
        }
    }

    /// Create a reply from a handler outcome.
    pub fn reply(id: JobId, result: Result<Value, String>) -> Self {
        match result {
            Ok(payload) => Self::Reply {
                id,
                payload: Some(payload),
                error: None,
            },
            Err(error) => Self::Reply {
                id,
                payload: None,
                error: Some(error),
            },
        }
    }

    /// Create a payload-less success reply (handshake acknowledgement).
    pub const fn ack(id: JobId) -> Self {
        Self::Reply {
            id,
            payload: None,
            error: None,
        }
    }

    /// Create a notification.
    pub fn notification(kind: impl Into<String>, payload: Value) -> Self {
        Self::Notification {
            kind: kind.into(),
            payload,
        }
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    /// Deserialize from a raw line that may not be valid UTF-8.
    pub fn from_bytes(line: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(line)
    }
}

/// Split a reply into the result it carries.
pub fn reply_result(payload: Option<Value>, error: Option<String>) -> Result<Value, String> {
    match error {
        Some(error) => Err(error),
        None => Ok(payload.unwrap_or(Value::Null)),
    }
}

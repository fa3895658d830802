#![forbid(unsafe_code)]

//! Boundary to the language model. The engine never speaks a wire protocol;
//! it hands a [`TurnRequest`] to an [`LlmTransport`] and commits whatever
//! [`TurnResponse`] comes back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnMessage {
    User {
        text: String,
    },
    Assistant {
        text: String,
    },
    ToolUse {
        use_id: String,
        name: String,
        params: Value,
    },
    ToolResult {
        use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnRequest {
    pub conversation_id: i64,
    pub generation: i64,
    /// Opaque continuation handle returned by the previous turn.
    pub previously: Option<String>,
    pub system_prompt: String,
    /// Blocks the model has not seen yet, oldest first.
    pub messages: Vec<TurnMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub compressing: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ToolInvocation {
    pub use_id: String,
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TurnResponse {
    #[serde(default)]
    pub texts: Vec<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub previously: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Worth another attempt after a backoff (rate limits, timeouts).
    #[error("retryable transport error: {0}")]
    Retryable(String),
    #[error("fatal transport error: {0}")]
    Fatal(String),
}

pub trait LlmTransport: Send + Sync {
    fn send(&self, request: &TurnRequest) -> Result<TurnResponse, TransportError>;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
    }
}

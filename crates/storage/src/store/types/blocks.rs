#![forbid(unsafe_code)]

use bw_core::TextRole;

/// Payload of a block. Exactly one shape is populated per row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockBody {
    Text {
        role: TextRole,
        body: String,
    },
    ToolUse {
        name: String,
        use_id: String,
        /// JSON object text as received from the model.
        params: String,
        response: Option<String>,
        errored: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRow {
    pub id: i64,
    pub conversation_id: i64,
    pub create_time: String,
    pub generation: i64,
    pub body: BlockBody,
    pub sent: bool,
}

impl BlockRow {
    pub fn tool_name(&self) -> Option<&str> {
        match &self.body {
            BlockBody::ToolUse { name, .. } => Some(name),
            BlockBody::Text { .. } => None,
        }
    }

    pub fn tool_response(&self) -> Option<&str> {
        match &self.body {
            BlockBody::ToolUse { response, .. } => response.as_deref(),
            BlockBody::Text { .. } => None,
        }
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.body, BlockBody::ToolUse { errored: true, .. })
    }

    /// A tool call that has neither a response nor an error yet.
    pub fn is_unresponded(&self) -> bool {
        matches!(
            self.body,
            BlockBody::ToolUse {
                response: None,
                errored: false,
                ..
            }
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NewBlock {
    Text {
        role: TextRole,
        body: String,
    },
    ToolUse {
        name: String,
        use_id: String,
        params: serde_json::Value,
    },
}

impl NewBlock {
    pub fn user(body: impl Into<String>) -> Self {
        Self::Text {
            role: TextRole::User,
            body: body.into(),
        }
    }

    pub fn assistant(body: impl Into<String>) -> Self {
        Self::Text {
            role: TextRole::Assistant,
            body: body.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolUsageStats {
    pub name: String,
    pub used: i64,
    pub failed: i64,
}

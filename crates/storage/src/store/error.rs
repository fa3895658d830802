#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unknown id")]
    UnknownId,
    #[error("unknown chapter {0}")]
    UnknownChapter(i64),
    #[error("unknown conversation {0}")]
    UnknownConversation(i64),
    #[error("unknown block {0}")]
    UnknownBlock(i64),
    #[error("block {block_id} already finalized ({field})")]
    BlockAlreadyFinalized {
        block_id: i64,
        field: &'static str,
    },
    #[error("conversation {conversation_id} is {status}")]
    ConversationTerminal {
        conversation_id: i64,
        status: &'static str,
    },
    #[error("claim mismatch for conversation {conversation_id}")]
    ClaimMismatch { conversation_id: i64 },
    #[error("consistency violation at chapter {chapter} slug {slug}: {detail}")]
    ConsistencyViolation {
        chapter: i64,
        slug: String,
        detail: String,
    },
    #[error("prompt not found: {0}")]
    PromptNotFound(String),
    #[error("slug {slug} already has a revision in later chapter {later_chapter}")]
    SlugConflict { slug: String, later_chapter: i64 },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQL",
            Self::Json(_) => "JSON",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::UnknownId => "UNKNOWN_ID",
            Self::UnknownChapter(_) => "UNKNOWN_CHAPTER",
            Self::UnknownConversation(_) => "UNKNOWN_CONVERSATION",
            Self::UnknownBlock(_) => "UNKNOWN_BLOCK",
            Self::BlockAlreadyFinalized { .. } => "BLOCK_ALREADY_FINALIZED",
            Self::ConversationTerminal { .. } => "CONVERSATION_TERMINAL",
            Self::ClaimMismatch { .. } => "CLAIM_MISMATCH",
            Self::ConsistencyViolation { .. } => "CONSISTENCY_VIOLATION",
            Self::PromptNotFound(_) => "PROMPT_NOT_FOUND",
            Self::SlugConflict { .. } => "SLUG_CONFLICT",
        }
    }

    /// Errors that indicate a broken store invariant rather than bad input.
    pub fn is_consistency_error(&self) -> bool {
        matches!(
            self,
            Self::ConsistencyViolation { .. } | Self::BlockAlreadyFinalized { .. }
        )
    }
}

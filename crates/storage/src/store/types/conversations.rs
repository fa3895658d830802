#![forbid(unsafe_code)]

use bw_core::{ConversationState, ConversationStatus, FailureReason, WaitingOn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationRow {
    pub id: i64,
    pub chapter: i64,
    pub previously: Option<String>,
    pub parent_block: Option<i64>,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub current_tokens: i64,
    pub current_generation: i64,
    pub waiting_on: Option<WaitingOn>,
    pub waiting_since: Option<String>,
    pub status: ConversationStatus,
    pub failure_reason: Option<FailureReason>,
    pub failure_detail: Option<String>,
    pub result: Option<String>,
    pub consecutive_tool_errors: i64,
    pub transport_attempts: i64,
    pub next_attempt_at_ms: i64,
    pub claimed_by: Option<String>,
    pub claim_expires_at_ms: Option<i64>,
    pub revision: i64,
    pub create_time: String,
}

impl ConversationRow {
    pub fn state(&self) -> ConversationState {
        ConversationState::from_columns(self.status, self.waiting_on.clone(), self.failure_reason)
    }

    pub fn is_root(&self) -> bool {
        self.parent_block.is_none()
    }

    pub fn total_tokens(&self) -> i64 {
        self.total_input_tokens.saturating_add(self.total_output_tokens)
    }
}

/// Proof of an exclusive lease on one conversation's next turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationClaim {
    pub conversation_id: i64,
    pub worker_id: String,
    pub revision: i64,
    pub expires_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The awaited thing finished normally; the text answers the tool call.
    Succeeded(String),
    /// The awaited thing failed; the detail is surfaced to the waiter.
    Failed(String),
}

/// What `resolve` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing was blocked on the id (already resolved or never awaited).
    NoWaiter,
    /// The waiter became runnable.
    Unblocked { conversation_id: i64 },
    /// The waiter still has another pending child or feedback and is now
    /// blocked on it.
    Reblocked {
        conversation_id: i64,
        waiting_on: WaitingOn,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountOutcome {
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    /// The ceiling was crossed and the conversation is now failed.
    pub exhausted: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConversationTotals {
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub runnable: i64,
    pub blocked: i64,
    pub completed: i64,
    pub failed: i64,
}

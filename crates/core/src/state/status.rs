#![forbid(unsafe_code)]

use super::WaitingOn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConversationStatus {
    Active,
    Completed,
    Failed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(Self::Active),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// Token ceiling or turn ceiling exceeded.
    ResourceExhausted,
    ToolErrorLimit,
    TransportExhausted,
    TransportFatal,
    WaitTimeout,
    ConsistencyViolation,
    /// An ancestor failed and the conversation was cancelled.
    ParentFailed,
    /// Active and unblocked with nothing left to send.
    Stalled,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::ToolErrorLimit => "TOOL_ERROR_LIMIT",
            Self::TransportExhausted => "TRANSPORT_EXHAUSTED",
            Self::TransportFatal => "TRANSPORT_FATAL",
            Self::WaitTimeout => "WAIT_TIMEOUT",
            Self::ConsistencyViolation => "CONSISTENCY_VIOLATION",
            Self::ParentFailed => "PARENT_FAILED",
            Self::Stalled => "STALLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "RESOURCE_EXHAUSTED" => Some(Self::ResourceExhausted),
            "TOOL_ERROR_LIMIT" => Some(Self::ToolErrorLimit),
            "TRANSPORT_EXHAUSTED" => Some(Self::TransportExhausted),
            "TRANSPORT_FATAL" => Some(Self::TransportFatal),
            "WAIT_TIMEOUT" => Some(Self::WaitTimeout),
            "CONSISTENCY_VIOLATION" => Some(Self::ConsistencyViolation),
            "PARENT_FAILED" => Some(Self::ParentFailed),
            "STALLED" => Some(Self::Stalled),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived lifecycle state of a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversationState {
    Runnable,
    Blocked(WaitingOn),
    Completed,
    Failed(FailureReason),
}

impl ConversationState {
    /// Folds the persisted columns into a single state. A terminal status wins
    /// over a stale waiting id.
    pub fn from_columns(
        status: ConversationStatus,
        waiting_on: Option<WaitingOn>,
        failure_reason: Option<FailureReason>,
    ) -> Self {
        match status {
            ConversationStatus::Completed => Self::Completed,
            ConversationStatus::Failed => {
                Self::Failed(failure_reason.unwrap_or(FailureReason::ConsistencyViolation))
            }
            ConversationStatus::Active => match waiting_on {
                Some(waiting) => Self::Blocked(waiting),
                None => Self::Runnable,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextRole {
    User,
    Assistant,
}

impl TextRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#![forbid(unsafe_code)]

const LLM_PREFIX: &str = "llm:";
const CONVERSATION_PREFIX: &str = "conversation:";
const FEEDBACK_PREFIX: &str = "feedback:";

/// What a blocked conversation is waiting for.
///
/// Persisted in `conversation.waiting_on_id` as `llm:<token>`,
/// `conversation:<id>` or `feedback:<block_id>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WaitingOn {
    /// An in-flight LLM request, keyed by `<conversation>-<generation>`.
    Llm(String),
    /// A spawned child conversation.
    Conversation(i64),
    /// An open `RequestExpertFeedback` block.
    Feedback(i64),
}

impl WaitingOn {
    pub fn llm_turn(conversation_id: i64, generation: i64) -> Self {
        Self::Llm(format!("{conversation_id}-{generation}"))
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Llm(token) => format!("{LLM_PREFIX}{token}"),
            Self::Conversation(id) => format!("{CONVERSATION_PREFIX}{id}"),
            Self::Feedback(id) => format!("{FEEDBACK_PREFIX}{id}"),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, WaitingOnError> {
        if let Some(token) = raw.strip_prefix(LLM_PREFIX) {
            if token.is_empty() || token.chars().any(|c| c.is_control() || c.is_whitespace()) {
                return Err(WaitingOnError::InvalidToken);
            }
            return Ok(Self::Llm(token.to_string()));
        }
        if let Some(id) = raw.strip_prefix(CONVERSATION_PREFIX) {
            return parse_id(id).map(Self::Conversation);
        }
        if let Some(id) = raw.strip_prefix(FEEDBACK_PREFIX) {
            return parse_id(id).map(Self::Feedback);
        }
        Err(WaitingOnError::UnknownKind)
    }

    pub fn is_llm(&self) -> bool {
        matches!(self, Self::Llm(_))
    }
}

impl std::fmt::Display for WaitingOn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

fn parse_id(raw: &str) -> Result<i64, WaitingOnError> {
    let id = raw.parse::<i64>().map_err(|_| WaitingOnError::InvalidId)?;
    if id <= 0 {
        return Err(WaitingOnError::InvalidId);
    }
    Ok(id)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitingOnError {
    UnknownKind,
    InvalidToken,
    InvalidId,
}

impl WaitingOnError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnknownKind => "waiting id must start with llm:, conversation: or feedback:",
            Self::InvalidToken => "llm waiting token is malformed",
            Self::InvalidId => "waiting id must reference a positive integer id",
        }
    }
}

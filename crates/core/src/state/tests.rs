use super::*;

#[test]
fn waiting_on_encoding() {
    assert_eq!(WaitingOn::llm_turn(7, 3).encode(), "llm:7-3");
    assert_eq!(WaitingOn::Conversation(12).encode(), "conversation:12");
    assert_eq!(WaitingOn::Feedback(40).encode(), "feedback:40");

    assert_eq!(
        WaitingOn::parse("conversation:12").expect("parse"),
        WaitingOn::Conversation(12)
    );
    assert_eq!(
        WaitingOn::parse("feedback:40").expect("parse"),
        WaitingOn::Feedback(40)
    );
    assert_eq!(
        WaitingOn::parse("llm:7-3").expect("parse"),
        WaitingOn::Llm("7-3".to_string())
    );
}

#[test]
fn waiting_on_rejects_garbage() {
    assert_eq!(
        WaitingOn::parse("job:1").unwrap_err(),
        WaitingOnError::UnknownKind
    );
    assert_eq!(
        WaitingOn::parse("conversation:abc").unwrap_err(),
        WaitingOnError::InvalidId
    );
    assert_eq!(
        WaitingOn::parse("feedback:0").unwrap_err(),
        WaitingOnError::InvalidId
    );
    assert_eq!(WaitingOn::parse("llm:").unwrap_err(), WaitingOnError::InvalidToken);
}

#[test]
fn status_and_reason_round_trip_through_column_text() {
    for status in [
        ConversationStatus::Active,
        ConversationStatus::Completed,
        ConversationStatus::Failed,
    ] {
        assert_eq!(ConversationStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(
        FailureReason::parse("WAIT_TIMEOUT"),
        Some(FailureReason::WaitTimeout)
    );
    assert_eq!(FailureReason::parse("nope"), None);
}

#[test]
fn state_from_columns() {
    assert_eq!(
        ConversationState::from_columns(ConversationStatus::Active, None, None),
        ConversationState::Runnable
    );
    assert_eq!(
        ConversationState::from_columns(
            ConversationStatus::Active,
            Some(WaitingOn::Feedback(3)),
            None
        ),
        ConversationState::Blocked(WaitingOn::Feedback(3))
    );
    let failed = ConversationState::from_columns(
        ConversationStatus::Failed,
        None,
        Some(FailureReason::ToolErrorLimit),
    );
    assert_eq!(failed, ConversationState::Failed(FailureReason::ToolErrorLimit));
    assert!(failed.is_terminal());
}

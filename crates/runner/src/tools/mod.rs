#![forbid(unsafe_code)]

//! The closed tool surface offered to agents. A call arrives as
//! `(name, params)`, is decoded into [`ToolCall`] and dispatched inside the
//! turn's write transaction.

mod agents;
mod catalogue;
mod chapter;
mod prompts;
mod wiki;

pub use agents::{CompleteTask, FinishChapter, RequestExpertFeedback, SpawnAgent};
pub use catalogue::{CATALOGUE, ToolSpec, find_tool, tool_descriptors};
pub use chapter::ReadChapter;
pub use prompts::{ListPrompts, ShowPrompt, WritePrompt};
pub use wiki::{ReadWikiPage, SearchWikiByName, WriteWikiPage};

use bw_storage::{ConversationRow, StoreError, WriteTx};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "name", content = "params")]
pub enum ToolCall {
    ReadChapter(ReadChapter),
    ReadWikiPage(ReadWikiPage),
    SearchWikiByName(SearchWikiByName),
    WriteWikiPage(WriteWikiPage),
    ListPrompts(ListPrompts),
    ShowPrompt(ShowPrompt),
    WritePrompt(WritePrompt),
    SpawnAgent(SpawnAgent),
    RequestExpertFeedback(RequestExpertFeedback),
    CompleteTask(CompleteTask),
    FinishChapter(FinishChapter),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),
    #[error("Invalid parameters for {tool}: {detail}")]
    InvalidParams { tool: String, detail: String },
    /// A problem the agent can fix and retry; the text is shown verbatim.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ToolError {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// The underlying store error when it signals a broken invariant.
    pub fn consistency_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(err) if err.is_consistency_error() => Some(err),
            _ => None,
        }
    }
}

/// Result of a successful tool call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Answer the call with this text.
    Responded(String),
    /// The call stays open until a sub-agent or a human answers it.
    Blocked,
    /// The sub-agent finished with this result.
    Completed(String),
    /// The root agent finished its chapter; the text answers the call.
    ChapterFinished(String),
}

/// What a tool sees of the call it is serving.
#[derive(Clone, Copy, Debug)]
pub struct ToolContext<'a> {
    pub conversation: &'a ConversationRow,
    pub block_id: i64,
    pub now_ms: i64,
}

impl ToolCall {
    pub fn parse(name: &str, params: &Value) -> Result<Self, ToolError> {
        if find_tool(name).is_none() {
            return Err(ToolError::UnknownTool(name.to_string()));
        }
        let params = match params {
            Value::Null => json!({}),
            other => other.clone(),
        };
        serde_json::from_value(json!({ "name": name, "params": params })).map_err(|err| {
            ToolError::InvalidParams {
                tool: name.to_string(),
                detail: err.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadChapter(_) => "ReadChapter",
            Self::ReadWikiPage(_) => "ReadWikiPage",
            Self::SearchWikiByName(_) => "SearchWikiByName",
            Self::WriteWikiPage(_) => "WriteWikiPage",
            Self::ListPrompts(_) => "ListPrompts",
            Self::ShowPrompt(_) => "ShowPrompt",
            Self::WritePrompt(_) => "WritePrompt",
            Self::SpawnAgent(_) => "SpawnAgent",
            Self::RequestExpertFeedback(_) => "RequestExpertFeedback",
            Self::CompleteTask(_) => "CompleteTask",
            Self::FinishChapter(_) => "FinishChapter",
        }
    }

    pub fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        debug!(
            conversation_id = ctx.conversation.id,
            block_id = ctx.block_id,
            tool = self.name(),
            "applying tool"
        );
        match self {
            Self::ReadChapter(call) => call.apply(tx, ctx).map(ToolOutcome::Responded),
            Self::ReadWikiPage(call) => call.apply(tx, ctx).map(ToolOutcome::Responded),
            Self::SearchWikiByName(call) => call.apply(tx, ctx).map(ToolOutcome::Responded),
            Self::WriteWikiPage(call) => call.apply(tx, ctx).map(ToolOutcome::Responded),
            Self::ListPrompts(call) => call.apply(tx).map(ToolOutcome::Responded),
            Self::ShowPrompt(call) => call.apply(tx).map(ToolOutcome::Responded),
            Self::WritePrompt(call) => call.apply(tx, ctx).map(ToolOutcome::Responded),
            Self::SpawnAgent(call) => call.apply(tx, ctx),
            Self::RequestExpertFeedback(call) => call.apply(tx, ctx),
            Self::CompleteTask(call) => call.apply(tx, ctx),
            Self::FinishChapter(call) => call.apply(tx, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tools_and_defaults_missing_params() {
        let call = ToolCall::parse("ListPrompts", &Value::Null).expect("no params");
        assert_eq!(call, ToolCall::ListPrompts(ListPrompts {}));

        let call = ToolCall::parse("ReadChapter", &json!({})).expect("optional offset");
        assert_eq!(call, ToolCall::ReadChapter(ReadChapter { chapter_offset: None }));

        let call = ToolCall::parse(
            "SearchWikiByName",
            &json!({ "names": ["Strider"], "results_page": 2 }),
        )
        .expect("search");
        assert_eq!(call.name(), "SearchWikiByName");
    }

    #[test]
    fn unknown_tools_and_fields_are_rejected() {
        let err = ToolCall::parse("DeleteEverything", &json!({})).expect_err("unknown tool");
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "DeleteEverything"));

        let err = ToolCall::parse("ReadWikiPage", &json!({ "slug": "bree", "extra": 1 }))
            .expect_err("unknown field");
        assert!(matches!(err, ToolError::InvalidParams { ref tool, .. } if tool == "ReadWikiPage"));

        let err = ToolCall::parse("WriteWikiPage", &json!({ "slug": "bree" }))
            .expect_err("missing create");
        assert!(matches!(err, ToolError::InvalidParams { .. }), "{err:?}");
    }

    #[test]
    fn every_catalogue_entry_parses_by_name() {
        for spec in CATALOGUE {
            let err = ToolCall::parse(spec.name, &json!({ "__probe": true }))
                .expect_err("probe field is never accepted");
            assert!(
                matches!(err, ToolError::InvalidParams { .. }),
                "{}: {err:?}",
                spec.name
            );
        }
    }
}

#![forbid(unsafe_code)]

use super::wiki::delete_and_redirect;
use super::{ToolContext, ToolError, ToolOutcome};
use bw_core::CHAPTER_SUMMARY_SLUG;
use bw_core::template::PromptTemplate;
use bw_storage::WriteTx;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

const FEEDBACK_LOG_CHARS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpawnAgent {
    pub prompt_key: String,
    pub template_names: Vec<String>,
    pub template_values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestExpertFeedback {
    pub request: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompleteTask {
    pub result: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinishChapter {}

/// Terminal tools may only run once every other call of the conversation
/// has an answer.
fn ensure_no_open_calls(tx: &WriteTx<'_>, ctx: ToolContext<'_>, tool: &str) -> Result<(), ToolError> {
    let open = tx
        .view()
        .unresponded_tool_calls(ctx.conversation.id)?
        .into_iter()
        .filter(|block| block.id != ctx.block_id)
        .count();
    if open > 0 {
        return Err(ToolError::rejected(format!(
            "Cannot call {tool} while {open} other tool call(s) are still waiting for an answer"
        )));
    }
    Ok(())
}

impl SpawnAgent {
    pub(super) fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        if self.template_names.len() != self.template_values.len() {
            return Err(ToolError::rejected(format!(
                "Variable names and values lists must have the same length. Got {} names and {} values.",
                self.template_names.len(),
                self.template_values.len()
            )));
        }
        if let Some(name) = self.template_names.iter().find(|name| name.contains('$')) {
            return Err(ToolError::rejected(format!(
                "Variable name '{name}' contains '$' character. Variable names should not include the '$' prefix."
            )));
        }

        let Some(prompt) = tx.view().get_prompt(&self.prompt_key)? else {
            return Err(ToolError::rejected("No prompt with that key exists"));
        };
        let template = PromptTemplate::parse(prompt.template.as_str())
            .map_err(|err| ToolError::rejected(format!("Stored prompt is not usable: {err}")))?;

        let values: BTreeMap<String, String> = self
            .template_names
            .iter()
            .cloned()
            .zip(self.template_values.iter().cloned())
            .collect();
        let expected: Vec<String> = template.identifiers().into_iter().collect();
        let actual: Vec<String> = values.keys().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        if expected != actual {
            return Err(ToolError::rejected(format!(
                "Failed to substitute vars!\nExpected keys: {expected:?}\nActual keys: {actual:?}"
            )));
        }
        let text = template
            .substitute(&values)
            .map_err(|err| ToolError::rejected(format!("Failed to substitute vars! {err}")))?;

        let child = tx.spawn_child(ctx.block_id, &text, ctx.now_ms)?;
        info!(
            conversation_id = ctx.conversation.id,
            child_conversation_id = child.id,
            block_id = ctx.block_id,
            prompt_key = %self.prompt_key,
            "agent spawned"
        );
        Ok(ToolOutcome::Blocked)
    }
}

impl RequestExpertFeedback {
    pub(super) fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        if self.request.trim().is_empty() {
            return Err(ToolError::rejected("The feedback request must not be empty"));
        }
        tx.request_feedback(ctx.block_id, ctx.now_ms)?;
        let preview: String = self.request.chars().take(FEEDBACK_LOG_CHARS).collect();
        info!(
            conversation_id = ctx.conversation.id,
            block_id = ctx.block_id,
            request = %preview,
            "expert feedback requested"
        );
        Ok(ToolOutcome::Blocked)
    }
}

impl CompleteTask {
    pub(super) fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        if ctx.conversation.is_root() {
            return Err(ToolError::rejected(
                "CompleteTask is only available to sub-agents. Use FinishChapter to end the chapter.",
            ));
        }
        ensure_no_open_calls(tx, ctx, "CompleteTask")?;
        Ok(ToolOutcome::Completed(self.result.clone()))
    }
}

impl FinishChapter {
    pub(super) fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        if !ctx.conversation.is_root() {
            return Err(ToolError::rejected(
                "FinishChapter is only available to the chapter agent. Use CompleteTask to return a result.",
            ));
        }
        ensure_no_open_calls(tx, ctx, "FinishChapter")?;

        let chapter = ctx.conversation.chapter;
        let Some(summary) = tx.view().read_current(chapter, CHAPTER_SUMMARY_SLUG)? else {
            return Err(ToolError::rejected(format!(
                "You must create a wiki page with the slug '{CHAPTER_SUMMARY_SLUG}' that summarizes \
                 the key events, characters, and plot developments from this chapter."
            )));
        };
        if summary.chapter != chapter {
            return Err(ToolError::rejected(format!(
                "The '{CHAPTER_SUMMARY_SLUG}' page must be written for this chapter."
            )));
        }

        tx.set_chapter_summary(chapter, summary.id)?;
        let removed = delete_and_redirect(tx, chapter, CHAPTER_SUMMARY_SLUG, "", ctx.block_id)?;
        info!(
            conversation_id = ctx.conversation.id,
            chapter,
            summary_page = summary.id,
            "chapter finished"
        );
        Ok(ToolOutcome::ChapterFinished(format!("Chapter finished. {removed}")))
    }
}

#![forbid(unsafe_code)]

use super::TurnOutcome;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::tools::{ToolCall, ToolContext, ToolError, ToolOutcome};
use crate::transport::{ToolInvocation, TurnResponse};
use bw_core::{CHAPTER_SUMMARY_SLUG, ConversationStatus, FailureReason, WaitingOn};
use bw_storage::{ConversationClaim, ConversationRow, NewBlock, ResolveOutcome, StoreError, WriteTx};
use tracing::{error, info, warn};

pub const SERIAL_TOOL_HINT: &str = "For better performance, consider using multiple tool calls \
in parallel if they don't depend on each other.";

pub const FINISH_CHAPTER_HINT: &str = "When the wiki reflects everything this chapter reveals, \
call FinishChapter to finish the chapter.";

const TASK_COMPLETED_RESPONSE: &str = "Task completed";

/// How dispatching one tool call ended for the turn as a whole.
enum Dispatch {
    Answered { errored: bool },
    /// The conversation reached a terminal state; later calls are dropped.
    Finished,
}

fn summary_missing_hint() -> String {
    format!(
        "You must create a wiki page with the slug '{CHAPTER_SUMMARY_SLUG}' that summarizes the key \
         events, characters, and plot developments from this chapter."
    )
}

/// Fails the root of the conversation's chapter after a broken store
/// invariant. The cascade takes every sub-agent with it and stops the
/// chapter from advancing.
fn fail_chapter_root(
    tx: &WriteTx<'_>,
    conversation: &ConversationRow,
    block_id: Option<i64>,
    err: &StoreError,
    now_ms: i64,
) -> Result<(), StoreError> {
    let root = tx
        .view()
        .chapter(conversation.chapter)?
        .and_then(|chapter| chapter.conversation_id)
        .unwrap_or(conversation.id);
    error!(
        conversation_id = conversation.id,
        generation = conversation.current_generation,
        block_id,
        root_conversation_id = root,
        code = err.code(),
        error = %err,
        "consistency violation during turn commit"
    );
    let detail = match block_id {
        Some(block_id) => format!("block {block_id}: {err}"),
        None => format!("conversation {}: {err}", conversation.id),
    };
    tx.fail(root, FailureReason::ConsistencyViolation, &detail, now_ms)?;
    Ok(())
}

/// Releases the claim and reports the committed turn. An active,
/// unblocked conversation must leave something to send; otherwise no
/// worker would ever claim it again and it is failed as stalled.
fn finish_turn(
    tx: &WriteTx<'_>,
    claim: &ConversationClaim,
    generation: i64,
    tool_calls: usize,
    now_ms: i64,
) -> Result<TurnOutcome, EngineError> {
    let conversation_id = claim.conversation_id;
    let after = tx.view().require_conversation(conversation_id)?;
    if after.status == ConversationStatus::Active
        && after.waiting_on.is_none()
        && tx.view().unsent_blocks(conversation_id)?.is_empty()
    {
        error!(conversation_id, generation, "turn left nothing to send");
        tx.fail(
            conversation_id,
            FailureReason::Stalled,
            "the turn produced nothing to send next",
            now_ms,
        )?;
        tx.release_claim(claim)?;
        return Ok(TurnOutcome::Failed {
            conversation_id,
            reason: FailureReason::Stalled,
        });
    }
    tx.release_claim(claim)?;
    Ok(TurnOutcome::Committed {
        conversation_id,
        generation,
        tool_calls,
    })
}

fn dispatch_tool(
    tx: &WriteTx<'_>,
    conversation: &ConversationRow,
    invocation: &ToolInvocation,
    now_ms: i64,
) -> Result<Dispatch, StoreError> {
    let block = match tx.append(
        conversation.id,
        NewBlock::ToolUse {
            name: invocation.name.clone(),
            use_id: invocation.use_id.clone(),
            params: invocation.params.clone(),
        },
    ) {
        Ok(block) => block,
        Err(StoreError::InvalidInput(reason)) => {
            warn!(
                conversation_id = conversation.id,
                generation = conversation.current_generation,
                tool = %invocation.name,
                reason,
                "malformed tool call dropped"
            );
            tx.append(
                conversation.id,
                NewBlock::user(format!(
                    "A tool call could not be recorded ({reason}). Check the tool name and call id."
                )),
            )?;
            return Ok(Dispatch::Answered { errored: true });
        }
        Err(err) => return Err(err),
    };

    let ctx = ToolContext {
        conversation,
        block_id: block.id,
        now_ms,
    };
    let outcome = ToolCall::parse(&invocation.name, &invocation.params)
        .and_then(|call| tx.savepoint(|tx| call.apply(tx, ctx)));

    match outcome {
        Ok(ToolOutcome::Responded(text)) => {
            tx.respond(block.id, &text)?;
            Ok(Dispatch::Answered { errored: false })
        }
        Ok(ToolOutcome::Blocked) => Ok(Dispatch::Answered { errored: false }),
        Ok(ToolOutcome::Completed(result)) => {
            tx.respond(block.id, TASK_COMPLETED_RESPONSE)?;
            tx.complete(conversation.id, &result, now_ms)?;
            Ok(Dispatch::Finished)
        }
        Ok(ToolOutcome::ChapterFinished(text)) => {
            tx.respond(block.id, &text)?;
            tx.complete(conversation.id, &text, now_ms)?;
            Ok(Dispatch::Finished)
        }
        Err(err) => {
            tx.mark_errored(block.id, &err.to_string())?;
            if let Some(store_err) = err.consistency_error() {
                fail_chapter_root(tx, conversation, Some(block.id), store_err, now_ms)?;
                return Ok(Dispatch::Finished);
            }
            if let ToolError::Store(store_err) = &err {
                warn!(
                    conversation_id = conversation.id,
                    generation = conversation.current_generation,
                    block_id = block.id,
                    tool = %invocation.name,
                    code = store_err.code(),
                    "tool call failed"
                );
            } else {
                info!(
                    conversation_id = conversation.id,
                    block_id = block.id,
                    tool = %invocation.name,
                    error = %err,
                    "tool call rejected"
                );
            }
            Ok(Dispatch::Answered { errored: true })
        }
    }
}

/// Applies a model response to the claimed conversation. Runs inside one
/// write transaction; any error rolls the whole turn back.
pub(crate) fn commit_turn(
    tx: &WriteTx<'_>,
    config: &EngineConfig,
    claim: &ConversationClaim,
    response: &TurnResponse,
    compressing: bool,
    now_ms: i64,
) -> Result<TurnOutcome, EngineError> {
    let before = tx.verify_claim(claim)?;
    let conversation_id = before.id;
    tx.resolve(
        &WaitingOn::llm_turn(conversation_id, before.current_generation),
        ResolveOutcome::Succeeded(String::new()),
        now_ms,
    )?;
    tx.reset_transport_attempts(conversation_id)?;
    let generation = tx.increment_generation(conversation_id)?;
    tx.mark_unsent_sent(conversation_id)?;
    let previously = if compressing {
        None
    } else {
        response.previously.as_deref()
    };
    tx.set_previously(conversation_id, previously)?;

    let accounted = tx.account(
        conversation_id,
        response.input_tokens.max(0),
        response.output_tokens.max(0),
        config.token_ceiling(),
        now_ms,
    )?;
    if accounted.exhausted {
        tx.release_claim(claim)?;
        return Ok(TurnOutcome::Failed {
            conversation_id,
            reason: FailureReason::ResourceExhausted,
        });
    }
    if config.max_turns > 0 && generation > config.max_turns {
        let detail = format!("reached the limit of {} turns", config.max_turns);
        tx.fail(conversation_id, FailureReason::ResourceExhausted, &detail, now_ms)?;
        tx.release_claim(claim)?;
        return Ok(TurnOutcome::Failed {
            conversation_id,
            reason: FailureReason::ResourceExhausted,
        });
    }

    // Fresh row: generation and token counters moved above.
    let conversation = tx.view().require_conversation(conversation_id)?;

    if compressing {
        for text in &response.texts {
            tx.append(conversation_id, NewBlock::user(text.clone()))?;
        }
        if response.texts.is_empty() {
            warn!(conversation_id, generation, "compression reply carried no text");
        } else {
            info!(conversation_id, generation, "conversation compressed");
        }
        return finish_turn(tx, claim, generation, 0, now_ms);
    }

    for text in &response.texts {
        tx.append(conversation_id, NewBlock::assistant(text.clone()))?;
    }

    let mut errored = Vec::with_capacity(response.tool_calls.len());
    let mut finished = false;
    for (index, invocation) in response.tool_calls.iter().enumerate() {
        match dispatch_tool(tx, &conversation, invocation, now_ms)? {
            Dispatch::Answered { errored: failed } => errored.push(failed),
            Dispatch::Finished => {
                let dropped = response.tool_calls.len() - index - 1;
                if dropped > 0 {
                    warn!(conversation_id, generation, dropped, "tool calls after finish ignored");
                }
                finished = true;
                break;
            }
        }
    }

    if !finished {
        let streak = tx.record_tool_results(conversation_id, &errored)?;
        if streak >= config.max_tool_errors {
            let detail = format!("{streak} consecutive tool errors");
            tx.fail(conversation_id, FailureReason::ToolErrorLimit, &detail, now_ms)?;
            tx.release_claim(claim)?;
            return Ok(TurnOutcome::Failed {
                conversation_id,
                reason: FailureReason::ToolErrorLimit,
            });
        }
    }

    if !finished {
        if let Some(tool) = tx.view().serial_tool_use(conversation_id, generation)? {
            info!(conversation_id, generation, tool = %tool, "serial tool use detected");
            tx.append(conversation_id, NewBlock::user(SERIAL_TOOL_HINT))?;
        }

        if response.tool_calls.is_empty() {
            if conversation.is_root() {
                let summary = match tx.view().read_current(conversation.chapter, CHAPTER_SUMMARY_SLUG) {
                    Ok(summary) => summary,
                    Err(err) if err.is_consistency_error() => {
                        fail_chapter_root(tx, &conversation, None, &err, now_ms)?;
                        tx.release_claim(claim)?;
                        return Ok(TurnOutcome::Failed {
                            conversation_id,
                            reason: FailureReason::ConsistencyViolation,
                        });
                    }
                    Err(err) => return Err(err.into()),
                };
                let has_summary = summary.is_some_and(|page| page.chapter == conversation.chapter);
                let hint = if has_summary {
                    FINISH_CHAPTER_HINT.to_string()
                } else {
                    summary_missing_hint()
                };
                tx.append(conversation_id, NewBlock::user(hint))?;
            } else {
                let result = response.texts.join("\n\n");
                tx.complete(conversation_id, &result, now_ms)?;
                info!(conversation_id, generation, "sub-agent completed without tool calls");
            }
        }
    }

    finish_turn(tx, claim, generation, response.tool_calls.len(), now_ms)
}

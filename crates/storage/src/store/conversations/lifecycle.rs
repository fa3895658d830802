#![forbid(unsafe_code)]

use crate::store::{AccountOutcome, ResolveOutcome, SqliteStore, StoreError, WriteTx};
use bw_core::{FailureReason, WaitingOn};
use rusqlite::params;
use tracing::{error, info, warn};

const CANCELLED_RESPONSE: &str = "[CANCELLED] the conversation that made this call has failed";

/// Tool response text a parent receives when its sub-agent fails.
pub fn failure_response(reason: FailureReason, detail: &str) -> String {
    format!("[FAILED:{reason}] {detail}")
}

impl WriteTx<'_> {
    /// Finishes a conversation successfully. A sub-agent's result answers the
    /// tool call that spawned it and wakes the parent.
    pub fn complete(&self, conversation_id: i64, result: &str, now_ms: i64) -> Result<(), StoreError> {
        let conversation = self.view().require_conversation(conversation_id)?;
        let changed = self.conn().execute(
            "UPDATE conversation SET status='COMPLETED', result=?2, waiting_on_id=NULL, \
               waiting_since=NULL, claimed_by=NULL, claim_expires_at_ms=NULL \
             WHERE id=?1 AND status='ACTIVE'",
            params![conversation_id, result],
        )?;
        if changed != 1 {
            return Err(StoreError::ConversationTerminal {
                conversation_id,
                status: conversation.status.as_str(),
            });
        }
        info!(
            conversation_id,
            generation = conversation.current_generation,
            "conversation completed"
        );
        if conversation.parent_block.is_some() {
            self.resolve(
                &WaitingOn::Conversation(conversation_id),
                ResolveOutcome::Succeeded(result.to_string()),
                now_ms,
            )?;
        }
        Ok(())
    }

    /// Fails a conversation and everything below it.
    ///
    /// Open tool calls of the failed conversations are closed as errored and
    /// every active descendant is cancelled with `ParentFailed`. A failed
    /// sub-agent answers its spawning tool call with an errored,
    /// failure-tagged response and wakes the parent; the parent itself keeps
    /// running. Returns `false` when the conversation was already terminal.
    pub fn fail(
        &self,
        conversation_id: i64,
        reason: FailureReason,
        detail: &str,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let conversation = self.view().require_conversation(conversation_id)?;
        if !self.mark_failed(conversation_id, reason, detail)? {
            return Ok(false);
        }
        error!(
            conversation_id,
            generation = conversation.current_generation,
            reason = %reason,
            detail,
            "conversation failed"
        );

        let mut worklist = vec![conversation_id];
        while let Some(id) = worklist.pop() {
            for block in self.view().unresponded_tool_calls(id)? {
                self.mark_errored(block.id, CANCELLED_RESPONSE)?;
            }
            for child in self.view().children(id)? {
                if child.status.is_terminal() {
                    continue;
                }
                let parent_detail = format!("ancestor conversation {conversation_id} failed");
                if self.mark_failed(child.id, FailureReason::ParentFailed, &parent_detail)? {
                    warn!(
                        conversation_id = child.id,
                        generation = child.current_generation,
                        failed_ancestor = conversation_id,
                        "sub-agent cancelled"
                    );
                    worklist.push(child.id);
                }
            }
        }

        if conversation.parent_block.is_some() {
            self.resolve(
                &WaitingOn::Conversation(conversation_id),
                ResolveOutcome::Failed(failure_response(reason, detail)),
                now_ms,
            )?;
        }
        Ok(true)
    }

    fn mark_failed(&self, conversation_id: i64, reason: FailureReason, detail: &str) -> Result<bool, StoreError> {
        let changed = self.conn().execute(
            "UPDATE conversation SET status='FAILED', failure_reason=?2, failure_detail=?3, \
               waiting_on_id=NULL, waiting_since=NULL, claimed_by=NULL, claim_expires_at_ms=NULL \
             WHERE id=?1 AND status='ACTIVE'",
            params![conversation_id, reason.as_str(), detail],
        )?;
        Ok(changed == 1)
    }

    /// Adds one turn's usage to the conversation totals. `current_tokens`
    /// becomes the size of the latest exchange. When the totals cross
    /// `ceiling` the conversation fails with `ResourceExhausted`.
    pub fn account(
        &self,
        conversation_id: i64,
        input_tokens: i64,
        output_tokens: i64,
        ceiling: Option<i64>,
        now_ms: i64,
    ) -> Result<AccountOutcome, StoreError> {
        if input_tokens < 0 || output_tokens < 0 {
            return Err(StoreError::InvalidInput("token counts must be >= 0"));
        }
        let changed = self.conn().execute(
            "UPDATE conversation SET \
               total_input_tokens = total_input_tokens + ?2, \
               total_output_tokens = total_output_tokens + ?3, \
               current_tokens = ?2 + ?3 \
             WHERE id=?1 AND status='ACTIVE'",
            params![conversation_id, input_tokens, output_tokens],
        )?;
        let conversation = self.view().require_conversation(conversation_id)?;
        if changed != 1 {
            return Err(StoreError::ConversationTerminal {
                conversation_id,
                status: conversation.status.as_str(),
            });
        }

        let total = conversation.total_tokens();
        let exhausted = ceiling.is_some_and(|limit| total > limit);
        if exhausted {
            let detail = format!("used {total} tokens, ceiling is {}", ceiling.unwrap_or_default());
            self.fail(conversation_id, FailureReason::ResourceExhausted, &detail, now_ms)?;
        }
        Ok(AccountOutcome {
            total_input_tokens: conversation.total_input_tokens,
            total_output_tokens: conversation.total_output_tokens,
            exhausted,
        })
    }
}

impl SqliteStore {
    pub fn complete(&mut self, conversation_id: i64, result: &str, now_ms: i64) -> Result<(), StoreError> {
        self.write("complete_conversation", |tx| tx.complete(conversation_id, result, now_ms))
    }

    pub fn fail(
        &mut self,
        conversation_id: i64,
        reason: FailureReason,
        detail: &str,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        self.write("fail_conversation", |tx| tx.fail(conversation_id, reason, detail, now_ms))
    }

    pub fn account(
        &mut self,
        conversation_id: i64,
        input_tokens: i64,
        output_tokens: i64,
        ceiling: Option<i64>,
        now_ms: i64,
    ) -> Result<AccountOutcome, StoreError> {
        self.write("account_tokens", |tx| {
            tx.account(conversation_id, input_tokens, output_tokens, ceiling, now_ms)
        })
    }
}

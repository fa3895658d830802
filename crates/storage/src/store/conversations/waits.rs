#![forbid(unsafe_code)]

use super::CONVERSATION_COLUMNS;
use super::conversation_from_row;
use crate::store::support::utc_from_ms;
use crate::store::{
    ConversationRow, ResolveOutcome, Resolution, SqliteStore, StoreError, WriteTx,
};
use bw_core::{FailureReason, WaitingOn};
use rusqlite::params;
use tracing::{debug, info, warn};

impl WriteTx<'_> {
    /// Sets the wait only when the conversation is active and not already
    /// blocked. Returns whether the wait was set.
    pub(crate) fn block_if_idle(
        &self,
        conversation_id: i64,
        waiting: &WaitingOn,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let since = utc_from_ms(now_ms)?;
        let changed = self.conn().execute(
            "UPDATE conversation SET waiting_on_id=?2, waiting_since=?3 \
             WHERE id=?1 AND status='ACTIVE' AND waiting_on_id IS NULL",
            params![conversation_id, waiting.encode(), since],
        )?;
        if changed == 1 {
            debug!(conversation_id, waiting_on = %waiting, "conversation blocked");
        }
        Ok(changed == 1)
    }

    pub(crate) fn clear_wait(&self, conversation_id: i64) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE conversation SET waiting_on_id=NULL, waiting_since=NULL WHERE id=?1",
            params![conversation_id],
        )?;
        Ok(())
    }

    /// The next thing a conversation must still wait for: a live sub-agent
    /// spawned by one of its open tool calls, or an open call without a
    /// sub-agent (a pending feedback request).
    pub(crate) fn next_pending_wait(&self, conversation_id: i64) -> Result<Option<WaitingOn>, StoreError> {
        for block in self.view().unresponded_tool_calls(conversation_id)? {
            match self.view().child_of_block(block.id)? {
                Some(child) if !child.status.is_terminal() => {
                    return Ok(Some(WaitingOn::Conversation(child.id)));
                }
                Some(_) => continue,
                None => return Ok(Some(WaitingOn::Feedback(block.id))),
            }
        }
        Ok(None)
    }

    /// Answers whatever `waiting` stands for and wakes the conversation
    /// blocked on it.
    ///
    /// For a sub-agent the owning tool call receives the outcome; for a
    /// feedback request the request block does. A tool call that is already
    /// answered is left alone, and with no waiter this is a no-op, so
    /// repeating a resolve changes nothing. A woken conversation that still
    /// has another pending sub-agent or feedback request is re-blocked on it.
    pub fn resolve(
        &self,
        waiting: &WaitingOn,
        outcome: ResolveOutcome,
        now_ms: i64,
    ) -> Result<Resolution, StoreError> {
        let answer_block = match waiting {
            WaitingOn::Conversation(child_id) => self.view().require_conversation(*child_id)?.parent_block,
            WaitingOn::Feedback(block_id) => Some(*block_id),
            WaitingOn::Llm(_) => None,
        };
        if let Some(block_id) = answer_block {
            let block = self.view().require_block(block_id)?;
            if block.is_unresponded() {
                match &outcome {
                    ResolveOutcome::Succeeded(text) => self.respond(block_id, text)?,
                    ResolveOutcome::Failed(text) => self.mark_errored(block_id, text)?,
                }
            }
        }

        let Some(waiter) = self.view().waiting_conversation(waiting)? else {
            return Ok(Resolution::NoWaiter);
        };
        self.clear_wait(waiter.id)?;

        if let Some(next) = self.next_pending_wait(waiter.id)? {
            self.block_if_idle(waiter.id, &next, now_ms)?;
            debug!(conversation_id = waiter.id, resolved = %waiting, waiting_on = %next, "conversation re-blocked");
            return Ok(Resolution::Reblocked {
                conversation_id: waiter.id,
                waiting_on: next,
            });
        }
        debug!(conversation_id = waiter.id, resolved = %waiting, "conversation runnable");
        Ok(Resolution::Unblocked {
            conversation_id: waiter.id,
        })
    }

    /// Answers an open feedback request with a human's response.
    pub fn submit_feedback(&self, block_id: i64, response: &str, now_ms: i64) -> Result<Resolution, StoreError> {
        let block = self.view().require_block(block_id)?;
        if block.tool_name().is_none() {
            return Err(StoreError::InvalidInput("feedback must answer a tool call"));
        }
        if !block.is_unresponded() {
            return Err(StoreError::BlockAlreadyFinalized {
                block_id,
                field: "tool_response",
            });
        }
        if self.view().child_of_block(block_id)?.is_some() {
            return Err(StoreError::InvalidInput("block is waiting on a sub-agent, not feedback"));
        }
        info!(block_id, conversation_id = block.conversation_id, "feedback submitted");
        self.resolve(
            &WaitingOn::Feedback(block_id),
            ResolveOutcome::Succeeded(response.to_string()),
            now_ms,
        )
    }

    /// Fails every conversation that has been blocked on a sub-agent or a
    /// feedback request for longer than `timeout_ms`. Returns their ids.
    pub fn expire_waits(&self, now_ms: i64, timeout_ms: i64) -> Result<Vec<i64>, StoreError> {
        let cutoff = utc_from_ms(now_ms.saturating_sub(timeout_ms))?;
        let stale: Vec<ConversationRow> = {
            let mut stmt = self.conn().prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversation \
                 WHERE status='ACTIVE' AND waiting_on_id IS NOT NULL \
                   AND waiting_on_id NOT LIKE 'llm:%' AND waiting_since < ?1 \
                 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![cutoff], conversation_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut failed = Vec::new();
        for conversation in stale {
            // An earlier failure in this sweep may already have cancelled it.
            let current = self.view().require_conversation(conversation.id)?;
            if current.status.is_terminal() {
                continue;
            }
            let waited_on = current
                .waiting_on
                .as_ref()
                .map(WaitingOn::encode)
                .unwrap_or_default();
            warn!(
                conversation_id = current.id,
                generation = current.current_generation,
                waiting_on = %waited_on,
                waiting_since = current.waiting_since.as_deref().unwrap_or(""),
                "wait timed out"
            );
            self.fail(
                current.id,
                FailureReason::WaitTimeout,
                &format!("timed out waiting on {waited_on}"),
                now_ms,
            )?;
            failed.push(current.id);
        }
        Ok(failed)
    }

    /// Clears LLM waits whose worker lease has lapsed, so a crashed worker's
    /// turn is retried from the unsent blocks. Returns the recovered ids.
    pub fn recover_interrupted_turns(&self, now_ms: i64) -> Result<Vec<i64>, StoreError> {
        let ids: Vec<i64> = {
            let mut stmt = self.conn().prepare(
                "SELECT id FROM conversation \
                 WHERE status='ACTIVE' AND waiting_on_id LIKE 'llm:%' \
                   AND (claim_expires_at_ms IS NULL OR claim_expires_at_ms <= ?1) \
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![now_ms], |row| row.get::<_, i64>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        for id in &ids {
            self.conn().execute(
                "UPDATE conversation SET waiting_on_id=NULL, waiting_since=NULL, \
                   claimed_by=NULL, claim_expires_at_ms=NULL, revision=revision+1 \
                 WHERE id=?1",
                params![id],
            )?;
            warn!(conversation_id = id, "recovered interrupted llm turn");
        }
        Ok(ids)
    }
}

impl SqliteStore {
    pub fn resolve(
        &mut self,
        waiting: &WaitingOn,
        outcome: ResolveOutcome,
        now_ms: i64,
    ) -> Result<Resolution, StoreError> {
        self.write("resolve", |tx| tx.resolve(waiting, outcome, now_ms))
    }

    pub fn submit_feedback(&mut self, block_id: i64, response: &str, now_ms: i64) -> Result<Resolution, StoreError> {
        self.write("submit_feedback", |tx| tx.submit_feedback(block_id, response, now_ms))
    }

    pub fn expire_waits(&mut self, now_ms: i64, timeout_ms: i64) -> Result<Vec<i64>, StoreError> {
        self.write("expire_waits", |tx| tx.expire_waits(now_ms, timeout_ms))
    }

    pub fn recover_interrupted_turns(&mut self, now_ms: i64) -> Result<Vec<i64>, StoreError> {
        self.write("recover_interrupted_turns", |tx| tx.recover_interrupted_turns(now_ms))
    }
}

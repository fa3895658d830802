#![forbid(unsafe_code)]

mod claims;
mod lifecycle;
mod waits;

pub use lifecycle::failure_response;

use super::support::{now_ms, utc_from_ms};
use super::{
    ConversationRow, ConversationTotals, NewBlock, SqliteStore, StoreError, StoreView, WriteTx,
    invalid_column,
};
use bw_core::{ConversationStatus, FailureReason, WaitingOn};
use rusqlite::{OptionalExtension, Row, params};
use tracing::info;

pub(super) const CONVERSATION_COLUMNS: &str = "id, chapter, previously, parent_block, \
     total_input_tokens, total_output_tokens, current_tokens, current_generation, \
     waiting_on_id, waiting_since, status, failure_reason, failure_detail, result, \
     consecutive_tool_errors, transport_attempts, next_attempt_at_ms, claimed_by, \
     claim_expires_at_ms, revision, create_time";

pub(super) fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    let waiting_on = row
        .get::<_, Option<String>>(8)?
        .map(|raw| WaitingOn::parse(&raw).map_err(|err| invalid_column(8, err.message())))
        .transpose()?;
    let raw_status: String = row.get(10)?;
    let status = ConversationStatus::parse(&raw_status)
        .ok_or_else(|| invalid_column(10, "unknown conversation status"))?;
    let failure_reason = row
        .get::<_, Option<String>>(11)?
        .map(|raw| FailureReason::parse(&raw).ok_or_else(|| invalid_column(11, "unknown failure reason")))
        .transpose()?;

    Ok(ConversationRow {
        id: row.get(0)?,
        chapter: row.get(1)?,
        previously: row.get(2)?,
        parent_block: row.get(3)?,
        total_input_tokens: row.get(4)?,
        total_output_tokens: row.get(5)?,
        current_tokens: row.get(6)?,
        current_generation: row.get(7)?,
        waiting_on,
        waiting_since: row.get(9)?,
        status,
        failure_reason,
        failure_detail: row.get(12)?,
        result: row.get(13)?,
        consecutive_tool_errors: row.get(14)?,
        transport_attempts: row.get(15)?,
        next_attempt_at_ms: row.get(16)?,
        claimed_by: row.get(17)?,
        claim_expires_at_ms: row.get(18)?,
        revision: row.get(19)?,
        create_time: row.get(20)?,
    })
}

impl StoreView<'_> {
    pub fn conversation(&self, id: i64) -> Result<Option<ConversationRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE id=?1"),
                params![id],
                conversation_from_row,
            )
            .optional()?)
    }

    pub fn require_conversation(&self, id: i64) -> Result<ConversationRow, StoreError> {
        self.conversation(id)?
            .ok_or(StoreError::UnknownConversation(id))
    }

    fn query_conversations(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<ConversationRow>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, conversation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Direct sub-agents of a conversation, in creation order.
    pub fn children(&self, conversation_id: i64) -> Result<Vec<ConversationRow>, StoreError> {
        self.query_conversations(
            &format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversation \
                 WHERE parent_block IN (SELECT id FROM block WHERE conversation=?1) \
                 ORDER BY id"
            ),
            params![conversation_id],
        )
    }

    /// The conversation spawned by a `SpawnAgent` block, if any.
    pub fn child_of_block(&self, block_id: i64) -> Result<Option<ConversationRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE parent_block=?1"),
                params![block_id],
                conversation_from_row,
            )
            .optional()?)
    }

    pub fn active_conversations(&self) -> Result<Vec<ConversationRow>, StoreError> {
        self.query_conversations(
            &format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE status='ACTIVE' ORDER BY id"
            ),
            [],
        )
    }

    pub fn waiting_conversation(&self, waiting: &WaitingOn) -> Result<Option<ConversationRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE waiting_on_id=?1"),
                params![waiting.encode()],
                conversation_from_row,
            )
            .optional()?)
    }

    pub fn has_active_conversations(&self) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM conversation WHERE status='ACTIVE' LIMIT 1",
                [],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    pub fn conversation_totals(&self) -> Result<ConversationTotals, StoreError> {
        Ok(self.conn.query_row(
            "SELECT \
               COALESCE(SUM(total_input_tokens), 0), \
               COALESCE(SUM(total_output_tokens), 0), \
               COALESCE(SUM(status='ACTIVE' AND waiting_on_id IS NULL), 0), \
               COALESCE(SUM(status='ACTIVE' AND waiting_on_id IS NOT NULL), 0), \
               COALESCE(SUM(status='COMPLETED'), 0), \
               COALESCE(SUM(status='FAILED'), 0) \
             FROM conversation",
            [],
            |row| {
                Ok(ConversationTotals {
                    total_input_tokens: row.get(0)?,
                    total_output_tokens: row.get(1)?,
                    runnable: row.get(2)?,
                    blocked: row.get(3)?,
                    completed: row.get(4)?,
                    failed: row.get(5)?,
                })
            },
        )?)
    }
}

impl WriteTx<'_> {
    fn insert_conversation(&self, chapter: i64, parent_block: Option<i64>) -> Result<i64, StoreError> {
        let create_time = utc_from_ms(now_ms())?;
        self.conn().execute(
            "INSERT INTO conversation(chapter, parent_block, create_time) VALUES (?1, ?2, ?3)",
            params![chapter, parent_block, create_time],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Starts processing of `chapter_id` with a fresh root conversation seeded
    /// with `prompt_text`.
    pub fn start_chapter_conversation(
        &self,
        chapter_id: i64,
        prompt_text: &str,
    ) -> Result<ConversationRow, StoreError> {
        self.view().require_chapter(chapter_id)?;
        let id = self.insert_conversation(chapter_id, None)?;
        self.start_chapter(chapter_id, id)?;
        self.append(id, NewBlock::user(prompt_text))?;
        info!(conversation_id = id, chapter = chapter_id, "chapter started");
        self.view().require_conversation(id)
    }

    /// Creates a sub-agent owned by `parent_block` and blocks the parent on
    /// it unless the parent is already waiting on something else.
    pub fn spawn_child(
        &self,
        parent_block: i64,
        prompt_text: &str,
        now_ms: i64,
    ) -> Result<ConversationRow, StoreError> {
        let block = self.view().require_block(parent_block)?;
        if !block.is_unresponded() {
            return Err(StoreError::InvalidInput(
                "sub-agents can only be spawned from an open tool call",
            ));
        }
        let parent = self.view().require_conversation(block.conversation_id)?;
        if parent.status.is_terminal() {
            return Err(StoreError::ConversationTerminal {
                conversation_id: parent.id,
                status: parent.status.as_str(),
            });
        }

        let id = self.insert_conversation(parent.chapter, Some(parent_block))?;
        self.append(id, NewBlock::user(prompt_text))?;
        self.block_if_idle(parent.id, &WaitingOn::Conversation(id), now_ms)?;
        info!(
            conversation_id = id,
            parent_conversation_id = parent.id,
            block_id = parent_block,
            "sub-agent spawned"
        );
        self.view().require_conversation(id)
    }

    /// Blocks a conversation on an open feedback request unless it is already
    /// waiting on something else.
    pub fn request_feedback(&self, block_id: i64, now_ms: i64) -> Result<(), StoreError> {
        let block = self.view().require_block(block_id)?;
        if !block.is_unresponded() {
            return Err(StoreError::InvalidInput(
                "feedback can only be requested from an open tool call",
            ));
        }
        self.block_if_idle(block.conversation_id, &WaitingOn::Feedback(block_id), now_ms)?;
        Ok(())
    }

    pub fn set_previously(&self, conversation_id: i64, previously: Option<&str>) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE conversation SET previously=?2 WHERE id=?1",
            params![conversation_id, previously],
        )?;
        Ok(())
    }

    /// Advances the turn counter and returns the new generation.
    pub fn increment_generation(&self, conversation_id: i64) -> Result<i64, StoreError> {
        let changed = self.conn().execute(
            "UPDATE conversation SET current_generation = current_generation + 1 \
             WHERE id=?1 AND status='ACTIVE'",
            params![conversation_id],
        )?;
        if changed != 1 {
            let conversation = self.view().require_conversation(conversation_id)?;
            return Err(StoreError::ConversationTerminal {
                conversation_id,
                status: conversation.status.as_str(),
            });
        }
        Ok(self.conn().query_row(
            "SELECT current_generation FROM conversation WHERE id=?1",
            params![conversation_id],
            |row| row.get(0),
        )?)
    }

    /// Folds this turn's tool outcomes, in call order, into the
    /// consecutive-error counter. `true` marks an errored call; any success
    /// resets the count.
    pub fn record_tool_results(&self, conversation_id: i64, errored: &[bool]) -> Result<i64, StoreError> {
        let mut count: i64 = self.conn().query_row(
            "SELECT consecutive_tool_errors FROM conversation WHERE id=?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        for &failed in errored {
            count = if failed { count + 1 } else { 0 };
        }
        self.conn().execute(
            "UPDATE conversation SET consecutive_tool_errors=?2 WHERE id=?1",
            params![conversation_id, count],
        )?;
        Ok(count)
    }
}

impl SqliteStore {
    pub fn start_chapter_conversation(
        &mut self,
        chapter_id: i64,
        prompt_text: &str,
    ) -> Result<ConversationRow, StoreError> {
        self.write("start_chapter_conversation", |tx| {
            tx.start_chapter_conversation(chapter_id, prompt_text)
        })
    }

    pub fn spawn_child(
        &mut self,
        parent_block: i64,
        prompt_text: &str,
        now_ms: i64,
    ) -> Result<ConversationRow, StoreError> {
        self.write("spawn_child", |tx| tx.spawn_child(parent_block, prompt_text, now_ms))
    }
}

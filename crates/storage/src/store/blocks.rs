#![forbid(unsafe_code)]

use super::support::now_ms;
use super::support::utc_from_ms;
use super::{
    BlockBody, BlockRow, NewBlock, SqliteStore, StoreError, StoreView, ToolUsageStats, WriteTx,
    invalid_column,
};
use bw_core::{ConversationStatus, TextRole};
use rusqlite::{OptionalExtension, Row, params};
use tracing::error;

const BLOCK_COLUMNS: &str = "id, conversation, create_time, generation, tool_name, tool_use_id, \
     tool_params, tool_response, text_role, text_body, sent, errored";

const MAX_TOOL_NAME_LEN: usize = 128;
const MAX_TOOL_USE_ID_LEN: usize = 256;

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<BlockRow> {
    let tool_name: Option<String> = row.get(4)?;
    let body = match tool_name {
        Some(name) => BlockBody::ToolUse {
            name,
            use_id: row.get(5)?,
            params: row.get(6)?,
            response: row.get(7)?,
            errored: row.get::<_, i64>(11)? != 0,
        },
        None => {
            let raw_role: String = row.get(8)?;
            BlockBody::Text {
                role: TextRole::parse(&raw_role)
                    .ok_or_else(|| invalid_column(8, "unknown text role"))?,
                body: row.get(9)?,
            }
        }
    };
    Ok(BlockRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        create_time: row.get(2)?,
        generation: row.get(3)?,
        body,
        sent: row.get::<_, i64>(10)? != 0,
    })
}

impl StoreView<'_> {
    pub fn get_block(&self, id: i64) -> Result<Option<BlockRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {BLOCK_COLUMNS} FROM block WHERE id=?1"),
                params![id],
                block_from_row,
            )
            .optional()?)
    }

    pub(crate) fn require_block(&self, id: i64) -> Result<BlockRow, StoreError> {
        self.get_block(id)?.ok_or(StoreError::UnknownBlock(id))
    }

    fn query_blocks(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<BlockRow>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, block_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The whole log of a conversation in `(generation, id)` order.
    pub fn blocks(&self, conversation_id: i64) -> Result<Vec<BlockRow>, StoreError> {
        self.query_blocks(
            &format!(
                "SELECT {BLOCK_COLUMNS} FROM block WHERE conversation=?1 ORDER BY generation, id"
            ),
            params![conversation_id],
        )
    }

    pub fn unsent_blocks(&self, conversation_id: i64) -> Result<Vec<BlockRow>, StoreError> {
        self.query_blocks(
            &format!(
                "SELECT {BLOCK_COLUMNS} FROM block WHERE conversation=?1 AND sent=0 \
                 ORDER BY generation, id"
            ),
            params![conversation_id],
        )
    }

    /// Tool calls still awaiting a response: where a resumed scheduler picks up.
    pub fn unresponded_tool_calls(&self, conversation_id: i64) -> Result<Vec<BlockRow>, StoreError> {
        self.query_blocks(
            &format!(
                "SELECT {BLOCK_COLUMNS} FROM block \
                 WHERE conversation=?1 AND tool_name IS NOT NULL \
                   AND tool_response IS NULL AND errored=0 \
                 ORDER BY generation, id"
            ),
            params![conversation_id],
        )
    }

    /// Open calls of one tool across all conversations, oldest first.
    pub fn unresponded_blocks_by_tool(&self, tool_name: &str) -> Result<Vec<BlockRow>, StoreError> {
        self.query_blocks(
            &format!(
                "SELECT {BLOCK_COLUMNS} FROM block \
                 WHERE tool_name=?1 AND tool_response IS NULL AND errored=0 \
                 ORDER BY id"
            ),
            params![tool_name],
        )
    }

    pub fn tool_usage_stats(&self) -> Result<Vec<ToolUsageStats>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT tool_name, COUNT(*), SUM(errored) FROM block \
             WHERE tool_name IS NOT NULL GROUP BY tool_name ORDER BY COUNT(*) DESC, tool_name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ToolUsageStats {
                name: row.get(0)?,
                used: row.get(1)?,
                failed: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Name of the tool when the last two generations each made exactly one
    /// tool call and both were the same tool.
    pub fn serial_tool_use(&self, conversation_id: i64, generation: i64) -> Result<Option<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT generation, tool_name, COUNT(*) FROM block \
             WHERE conversation=?1 AND tool_name IS NOT NULL AND generation IN (?2, ?2 - 1) \
             GROUP BY generation, tool_name",
        )?;
        let rows = stmt.query_map(params![conversation_id, generation], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        match rows.as_slice() {
            [(g1, t1, 1), (g2, t2, 1)] if g1 != g2 && t1 == t2 => Ok(Some(t1.clone())),
            _ => Ok(None),
        }
    }
}

impl WriteTx<'_> {
    /// Appends a block at the conversation's current generation.
    pub fn append(&self, conversation_id: i64, block: NewBlock) -> Result<BlockRow, StoreError> {
        let conn = self.conn();
        let (status, generation): (String, i64) = conn
            .query_row(
                "SELECT status, current_generation FROM conversation WHERE id=?1",
                params![conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::UnknownConversation(conversation_id))?;
        let status = ConversationStatus::parse(&status)
            .ok_or(StoreError::InvalidInput("unknown conversation status"))?;
        if status.is_terminal() {
            return Err(StoreError::ConversationTerminal {
                conversation_id,
                status: status.as_str(),
            });
        }

        let create_time = utc_from_ms(now_ms())?;
        let body = match block {
            NewBlock::Text { role, body } => {
                conn.execute(
                    "INSERT INTO block(conversation, create_time, generation, text_role, text_body) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![conversation_id, create_time, generation, role.as_str(), body],
                )?;
                BlockBody::Text { role, body }
            }
            NewBlock::ToolUse {
                name,
                use_id,
                params: tool_params,
            } => {
                if name.trim().is_empty() || name.len() > MAX_TOOL_NAME_LEN {
                    return Err(StoreError::InvalidInput("invalid tool name"));
                }
                if use_id.trim().is_empty() || use_id.len() > MAX_TOOL_USE_ID_LEN {
                    return Err(StoreError::InvalidInput("invalid tool_use_id"));
                }
                let params_json = serde_json::to_string(&tool_params)?;
                conn.execute(
                    "INSERT INTO block(conversation, create_time, generation, tool_name, tool_use_id, tool_params) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![conversation_id, create_time, generation, name, use_id, params_json],
                )?;
                BlockBody::ToolUse {
                    name,
                    use_id,
                    params: params_json,
                    response: None,
                    errored: false,
                }
            }
        };

        Ok(BlockRow {
            id: conn.last_insert_rowid(),
            conversation_id,
            create_time,
            generation,
            body,
            sent: false,
        })
    }

    pub fn mark_sent(&self, block_id: i64) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE block SET sent=1 WHERE id=?1 AND sent=0",
            params![block_id],
        )?;
        if changed != 1 {
            self.view().require_block(block_id)?;
            return Err(already_finalized(block_id, "sent"));
        }
        Ok(())
    }

    /// Marks every unsent block of the conversation as sent.
    pub fn mark_unsent_sent(&self, conversation_id: i64) -> Result<usize, StoreError> {
        Ok(self.conn().execute(
            "UPDATE block SET sent=1 WHERE conversation=?1 AND sent=0",
            params![conversation_id],
        )?)
    }

    pub fn respond(&self, block_id: i64, response: &str) -> Result<(), StoreError> {
        self.finish_tool_block(block_id, response, false)
    }

    pub fn mark_errored(&self, block_id: i64, response: &str) -> Result<(), StoreError> {
        self.finish_tool_block(block_id, response, true)
    }

    fn finish_tool_block(&self, block_id: i64, response: &str, errored: bool) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE block SET tool_response=?2, errored=?3 \
             WHERE id=?1 AND tool_name IS NOT NULL AND tool_response IS NULL AND errored=0",
            params![block_id, response, i64::from(errored)],
        )?;
        if changed == 1 {
            return Ok(());
        }
        let block = self.view().require_block(block_id)?;
        if block.tool_name().is_none() {
            return Err(StoreError::InvalidInput("only tool blocks take a response"));
        }
        error!(block_id, errored, "tool block finalized twice");
        Err(already_finalized(block_id, "tool_response"))
    }
}

fn already_finalized(block_id: i64, field: &'static str) -> StoreError {
    StoreError::BlockAlreadyFinalized { block_id, field }
}

impl SqliteStore {
    pub fn append(&mut self, conversation_id: i64, block: NewBlock) -> Result<BlockRow, StoreError> {
        self.write("append_block", |tx| tx.append(conversation_id, block))
    }

    pub fn mark_sent(&mut self, block_id: i64) -> Result<(), StoreError> {
        self.write("mark_sent", |tx| tx.mark_sent(block_id))
    }

    pub fn mark_errored(&mut self, block_id: i64, response: &str) -> Result<(), StoreError> {
        self.write("mark_errored", |tx| tx.mark_errored(block_id, response))
    }
}

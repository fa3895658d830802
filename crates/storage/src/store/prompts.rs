#![forbid(unsafe_code)]

use super::support::next_create_time;
use super::{CreatePromptRequest, PromptRow, SqliteStore, StoreError, StoreView, WriteTx};
use bw_core::PromptKey;
use bw_core::template::PromptTemplate;
use rusqlite::{OptionalExtension, Row, params};
use std::collections::BTreeMap;
use tracing::info;

const MAX_PROMPT_SUMMARY_LEN: usize = 1_000;
const MAX_PROMPT_TEMPLATE_LEN: usize = 64 * 1024;

fn prompt_from_row(row: &Row<'_>) -> rusqlite::Result<PromptRow> {
    Ok(PromptRow {
        key: row.get(0)?,
        create_time: row.get(1)?,
        create_block: row.get(2)?,
        summary: row.get(3)?,
        template: row.get(4)?,
    })
}

impl StoreView<'_> {
    /// The active version of every prompt key.
    pub fn active_prompts(&self) -> Result<BTreeMap<String, PromptRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.key, p.create_time, p.create_block, p.summary, p.template \
             FROM prompt p \
             WHERE p.create_time = (SELECT MAX(q.create_time) FROM prompt q WHERE q.key = p.key) \
             ORDER BY p.key ASC",
        )?;
        let rows = stmt.query_map([], prompt_from_row)?;
        let mut out = BTreeMap::new();
        for row in rows {
            let prompt = row?;
            out.insert(prompt.key.clone(), prompt);
        }
        Ok(out)
    }

    pub fn get_prompt(&self, key: &str) -> Result<Option<PromptRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT key, create_time, create_block, summary, template FROM prompt \
                 WHERE key=?1 ORDER BY create_time DESC LIMIT 1",
                params![key],
                prompt_from_row,
            )
            .optional()?)
    }

    pub fn require_prompt(&self, key: &str) -> Result<PromptRow, StoreError> {
        self.get_prompt(key)?
            .ok_or_else(|| StoreError::PromptNotFound(key.to_string()))
    }

    /// Every version of `key`, oldest first.
    pub fn prompt_history(&self, key: &str) -> Result<Vec<PromptRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT key, create_time, create_block, summary, template FROM prompt \
             WHERE key=?1 ORDER BY create_time ASC",
        )?;
        let rows = stmt.query_map(params![key], prompt_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl WriteTx<'_> {
    /// Stores a new version of a prompt. Earlier versions stay untouched.
    pub fn create_prompt(&self, request: CreatePromptRequest) -> Result<PromptRow, StoreError> {
        let key = PromptKey::try_new(request.key)
            .map_err(|err| StoreError::InvalidInput(err.message()))?;
        if request.summary.trim().is_empty() {
            return Err(StoreError::InvalidInput("prompt summary must not be empty"));
        }
        if request.summary.len() > MAX_PROMPT_SUMMARY_LEN {
            return Err(StoreError::InvalidInput("prompt summary is too long"));
        }
        if request.template.len() > MAX_PROMPT_TEMPLATE_LEN {
            return Err(StoreError::InvalidInput("prompt template is too long"));
        }
        if !PromptTemplate::is_valid(&request.template) {
            return Err(StoreError::InvalidInput(
                "prompt template has invalid placeholders",
            ));
        }

        let create_time = next_create_time(self.conn(), "prompt")?;
        self.conn().execute(
            "INSERT INTO prompt(key, create_time, create_block, summary, template) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.as_str(),
                create_time,
                request.create_block,
                request.summary,
                request.template
            ],
        )?;
        info!(key = key.as_str(), "prompt stored");

        Ok(PromptRow {
            key: key.as_str().to_string(),
            create_time,
            create_block: request.create_block,
            summary: request.summary,
            template: request.template,
        })
    }
}

impl SqliteStore {
    pub fn create_prompt(&mut self, request: CreatePromptRequest) -> Result<PromptRow, StoreError> {
        self.write("create_prompt", |tx| tx.create_prompt(request))
    }
}

#![forbid(unsafe_code)]

use super::utc_from_ms;
use crate::store::StoreError;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;

pub(in crate::store) const SCHEMA_VERSION: i64 = 1;

const REQUIRED_TABLES: [&str; 10] = [
    "store_state",
    "configuration",
    "chapter",
    "conversation",
    "block",
    "prompt",
    "wiki_page",
    "wiki_page_current",
    "wiki_name",
    "wiki_page_name",
];

/// Refuses to open a database that was created by something else or by an
/// incompatible schema version. An empty database passes.
pub(in crate::store) fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = REQUIRED_TABLES.into_iter().collect();
    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }
    if required.iter().any(|table| !tables.contains(*table)) {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: required table is missing",
        ));
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM store_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match version {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(_) => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema version mismatch",
        )),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

pub(in crate::store) fn install_schema(conn: &Connection, now_ms: i64) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS store_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS configuration (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chapter (
          id INTEGER PRIMARY KEY CHECK(id >= 0),
          name TEXT NOT NULL UNIQUE
            CHECK(json_valid(name) AND json_type(name) = 'array' AND json_array_length(name) > 0),
          text TEXT NOT NULL,
          conversation_id INTEGER UNIQUE REFERENCES conversation(id),
          chapter_summary_page_id INTEGER REFERENCES wiki_page(id)
        );

        CREATE TABLE IF NOT EXISTS conversation (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          chapter INTEGER NOT NULL REFERENCES chapter(id),
          previously TEXT,
          parent_block INTEGER UNIQUE REFERENCES block(id),
          total_input_tokens INTEGER NOT NULL DEFAULT 0 CHECK(total_input_tokens >= 0),
          total_output_tokens INTEGER NOT NULL DEFAULT 0 CHECK(total_output_tokens >= 0),
          current_tokens INTEGER NOT NULL DEFAULT 0,
          current_generation INTEGER NOT NULL DEFAULT 0 CHECK(current_generation >= 0),
          waiting_on_id TEXT UNIQUE,
          waiting_since TEXT,
          status TEXT NOT NULL DEFAULT 'ACTIVE'
            CHECK(status IN ('ACTIVE', 'COMPLETED', 'FAILED')),
          failure_reason TEXT,
          failure_detail TEXT,
          result TEXT,
          consecutive_tool_errors INTEGER NOT NULL DEFAULT 0,
          transport_attempts INTEGER NOT NULL DEFAULT 0,
          next_attempt_at_ms INTEGER NOT NULL DEFAULT 0,
          claimed_by TEXT,
          claim_expires_at_ms INTEGER,
          revision INTEGER NOT NULL DEFAULT 0,
          create_time TEXT NOT NULL,
          CHECK(status = 'ACTIVE' OR waiting_on_id IS NULL),
          CHECK((waiting_on_id IS NULL) = (waiting_since IS NULL)),
          CHECK((status = 'FAILED') = (failure_reason IS NOT NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_conversation_status
          ON conversation(status, id);

        CREATE TABLE IF NOT EXISTS block (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          conversation INTEGER NOT NULL REFERENCES conversation(id),
          create_time TEXT NOT NULL,
          generation INTEGER NOT NULL CHECK(generation >= 0),
          tool_name TEXT,
          tool_use_id TEXT,
          tool_params TEXT,
          tool_response TEXT,
          text_role TEXT CHECK(text_role IS NULL OR text_role IN ('user', 'assistant')),
          text_body TEXT,
          sent INTEGER NOT NULL DEFAULT 0 CHECK(sent IN (0, 1)),
          errored INTEGER NOT NULL DEFAULT 0 CHECK(errored IN (0, 1)),
          CHECK(
            (tool_name IS NOT NULL AND tool_use_id IS NOT NULL AND tool_params IS NOT NULL
              AND text_role IS NULL AND text_body IS NULL)
            OR
            (tool_name IS NULL AND tool_use_id IS NULL AND tool_params IS NULL
              AND tool_response IS NULL AND text_role IS NOT NULL AND text_body IS NOT NULL)
          ),
          CHECK(tool_params IS NULL OR json_valid(tool_params)),
          CHECK(errored = 0 OR tool_response IS NOT NULL)
        );

        CREATE INDEX IF NOT EXISTS idx_block_conversation
          ON block(conversation, generation, id);
        CREATE INDEX IF NOT EXISTS idx_block_tool
          ON block(tool_name, id);

        CREATE TABLE IF NOT EXISTS prompt (
          key TEXT NOT NULL CHECK(key <> ''),
          create_time TEXT NOT NULL,
          create_block INTEGER REFERENCES block(id),
          summary TEXT NOT NULL,
          template TEXT NOT NULL,
          PRIMARY KEY(key, create_time)
        );

        CREATE TABLE IF NOT EXISTS wiki_page (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          chapter INTEGER NOT NULL REFERENCES chapter(id),
          slug TEXT NOT NULL,
          create_time TEXT NOT NULL,
          create_block INTEGER NOT NULL REFERENCES block(id),
          title TEXT NOT NULL,
          names TEXT NOT NULL CHECK(json_valid(names) AND json_type(names) = 'array'),
          summary TEXT NOT NULL,
          body TEXT NOT NULL,
          UNIQUE(slug, chapter, create_time)
        );

        CREATE INDEX IF NOT EXISTS idx_wiki_page_slug
          ON wiki_page(slug, chapter, create_time, id);
        CREATE INDEX IF NOT EXISTS idx_wiki_page_chapter
          ON wiki_page(chapter, slug);

        CREATE TABLE IF NOT EXISTS wiki_page_current (
          chapter INTEGER NOT NULL REFERENCES chapter(id),
          slug TEXT NOT NULL,
          wiki_page INTEGER NOT NULL REFERENCES wiki_page(id),
          PRIMARY KEY(chapter, slug)
        );

        CREATE TABLE IF NOT EXISTS wiki_name (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL UNIQUE,
          name_key TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_wiki_name_key ON wiki_name(name_key);

        CREATE TABLE IF NOT EXISTS wiki_page_name (
          wiki_page_id INTEGER NOT NULL REFERENCES wiki_page(id),
          wiki_name_id INTEGER NOT NULL REFERENCES wiki_name(id),
          kind TEXT NOT NULL CHECK(kind IN ('alias', 'mention')),
          PRIMARY KEY(wiki_page_id, wiki_name_id)
        );

        CREATE INDEX IF NOT EXISTS idx_wiki_page_name_name
          ON wiki_page_name(wiki_name_id, wiki_page_id);
        "#,
    )?;

    let now = utc_from_ms(now_ms)?;
    conn.execute(
        "INSERT INTO store_state(singleton, schema_version, created_at, updated_at) \
         VALUES (1, ?1, ?2, ?2) \
         ON CONFLICT(singleton) DO UPDATE SET schema_version=excluded.schema_version, updated_at=excluded.updated_at",
        params![SCHEMA_VERSION, now],
    )?;

    Ok(())
}

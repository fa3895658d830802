#![forbid(unsafe_code)]

mod blocks;
mod chapters;
mod config;
mod conversations;
mod error;
mod names;
mod prompts;
mod reader;
mod requests;
mod support;
mod types;
mod wiki;

pub use conversations::failure_response;
pub use config::{ConfigKey, DEFAULT_CHAPTER_PROMPT, DEFAULT_COMPRESS_PROMPT, DEFAULT_SYSTEM_PROMPT};
pub use error::StoreError;
pub use reader::{NameIndexEntry, WikiPageView};
pub use requests::*;
pub use types::*;

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use support::{SlowOpGuard, install_schema, now_ms, preflight_gate};

const DB_FILE_NAME: &str = "bookwiki.db";
const DEFAULT_SLOW_TX_THRESHOLD: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
    slow_threshold: Duration,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE_NAME);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;

        preflight_gate(&conn)?;
        install_schema(&conn, now_ms())?;

        Ok(Self {
            conn,
            storage_dir,
            slow_threshold: DEFAULT_SLOW_TX_THRESHOLD,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn set_slow_threshold(&mut self, threshold: Duration) {
        self.slow_threshold = threshold;
    }

    /// Read-only access to committed state.
    pub fn view(&self) -> StoreView<'_> {
        StoreView { conn: &self.conn }
    }

    /// Runs `f` inside one `BEGIN IMMEDIATE` transaction. The transaction
    /// commits only when `f` returns `Ok`; any error rolls everything back.
    pub fn write<T, E>(
        &mut self,
        label: &'static str,
        f: impl FnOnce(&WriteTx<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let _slow = SlowOpGuard::new(label, self.slow_threshold);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let wtx = WriteTx { tx };
        let out = f(&wtx)?;
        wtx.tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }
}

/// Read-only query surface over a connection or an open transaction.
#[derive(Clone, Copy, Debug)]
pub struct StoreView<'a> {
    conn: &'a Connection,
}

/// An open write transaction. All mutating store operations live here so
/// that one orchestrator turn can compose them atomically.
#[derive(Debug)]
pub struct WriteTx<'a> {
    tx: Transaction<'a>,
}

impl WriteTx<'_> {
    pub fn view(&self) -> StoreView<'_> {
        StoreView { conn: &self.tx }
    }

    fn conn(&self) -> &Connection {
        &self.tx
    }

    /// Runs `f` under a savepoint: on error only `f`'s writes are undone and
    /// the surrounding transaction stays usable.
    pub fn savepoint<T, E>(&self, f: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        self.tx
            .execute_batch("SAVEPOINT bw_step")
            .map_err(StoreError::from)?;
        match f(self) {
            Ok(value) => {
                self.tx
                    .execute_batch("RELEASE bw_step")
                    .map_err(StoreError::from)?;
                Ok(value)
            }
            Err(err) => {
                self.tx
                    .execute_batch("ROLLBACK TO bw_step; RELEASE bw_step")
                    .map_err(StoreError::from)?;
                Err(err)
            }
        }
    }
}

pub(crate) fn invalid_column(index: usize, what: &'static str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, what.into())
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

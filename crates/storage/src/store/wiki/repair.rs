#![forbid(unsafe_code)]

use super::{VISIBLE_AT_CHAPTER_SQL, VISIBLE_PAIRS_SQL};
use crate::store::{CurrentMismatch, SqliteStore, StoreError, StoreView, WriteTx};
use rusqlite::{Connection, params};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

type PointerMap = BTreeMap<(i64, String), i64>;

fn load_pairs(conn: &Connection, sql: &str) -> Result<PointerMap, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(((row.get::<_, i64>(0)?, row.get::<_, String>(1)?), row.get::<_, i64>(2)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (key, page) = row?;
        out.insert(key, page);
    }
    Ok(out)
}

impl StoreView<'_> {
    /// Compares the pointer table with the revision log and returns every
    /// `(chapter, slug)` on which they disagree. Empty means consistent.
    pub fn verify_current(&self) -> Result<Vec<CurrentMismatch>, StoreError> {
        let materialized = load_pairs(
            self.conn,
            "SELECT chapter, slug, wiki_page FROM wiki_page_current",
        )?;
        let expected = load_pairs(self.conn, VISIBLE_PAIRS_SQL)?;

        let keys: BTreeSet<&(i64, String)> = materialized.keys().chain(expected.keys()).collect();
        let mut out = Vec::new();
        for key in keys {
            let have = materialized.get(key).copied();
            let want = expected.get(key).copied();
            if have != want {
                out.push(CurrentMismatch {
                    chapter: key.0,
                    slug: key.1.clone(),
                    materialized: have,
                    expected: want,
                });
            }
        }
        if !out.is_empty() {
            warn!(mismatches = out.len(), "current pointer table disagrees with revision log");
        }
        Ok(out)
    }
}

impl WriteTx<'_> {
    pub(crate) fn materialize_chapter_pointers(&self, chapter: i64) -> Result<usize, StoreError> {
        self.conn().execute(
            "DELETE FROM wiki_page_current WHERE chapter=?1",
            params![chapter],
        )?;
        let inserted = self.conn().execute(
            &format!("INSERT INTO wiki_page_current(chapter, slug, wiki_page) {VISIBLE_AT_CHAPTER_SQL}"),
            params![chapter],
        )?;
        Ok(inserted)
    }

    /// Recomputes the whole pointer table from the revision log.
    pub fn rebuild_current(&self) -> Result<usize, StoreError> {
        self.conn().execute("DELETE FROM wiki_page_current", [])?;
        let inserted = self.conn().execute(
            &format!("INSERT INTO wiki_page_current(chapter, slug, wiki_page) {VISIBLE_PAIRS_SQL}"),
            [],
        )?;
        info!(pointers = inserted, "current pointer table rebuilt");
        Ok(inserted)
    }
}

impl SqliteStore {
    pub fn rebuild_current(&mut self) -> Result<usize, StoreError> {
        self.write("rebuild_current", |tx| tx.rebuild_current())
    }
}

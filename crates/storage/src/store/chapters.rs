#![forbid(unsafe_code)]

use super::{
    AddChapterRequest, ChapterRow, SqliteStore, StoreError, StoreView, WriteTx, invalid_column,
    is_constraint_violation,
};
use bw_core::ChapterName;
use rusqlite::{OptionalExtension, Row, params};
use tracing::info;

const CHAPTER_COLUMNS: &str = "id, name, text, conversation_id, chapter_summary_page_id";

fn chapter_from_row(row: &Row<'_>) -> rusqlite::Result<ChapterRow> {
    let raw_name: String = row.get(1)?;
    let name: Vec<String> = serde_json::from_str(&raw_name)
        .map_err(|_| invalid_column(1, "chapter name is not a string array"))?;
    Ok(ChapterRow {
        id: row.get(0)?,
        name,
        text: row.get(2)?,
        conversation_id: row.get(3)?,
        chapter_summary_page_id: row.get(4)?,
    })
}

impl StoreView<'_> {
    pub fn chapter(&self, id: i64) -> Result<Option<ChapterRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CHAPTER_COLUMNS} FROM chapter WHERE id=?1"),
                params![id],
                chapter_from_row,
            )
            .optional()?)
    }

    pub(crate) fn require_chapter(&self, id: i64) -> Result<ChapterRow, StoreError> {
        self.chapter(id)?.ok_or(StoreError::UnknownChapter(id))
    }

    pub fn chapters(&self) -> Result<Vec<ChapterRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CHAPTER_COLUMNS} FROM chapter ORDER BY id ASC"))?;
        let rows = stmt.query_map([], chapter_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The chapter currently being processed: the highest started one.
    pub fn latest_started_chapter(&self) -> Result<Option<ChapterRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {CHAPTER_COLUMNS} FROM chapter \
                     WHERE conversation_id IS NOT NULL ORDER BY id DESC LIMIT 1"
                ),
                [],
                chapter_from_row,
            )
            .optional()?)
    }

    /// The chapter `steps` positions before `chapter` in id order; ids may
    /// have gaps. `steps == 0` is `chapter` itself.
    pub fn chapter_before(&self, chapter: i64, steps: u32) -> Result<Option<ChapterRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {CHAPTER_COLUMNS} FROM chapter \
                     WHERE id <= ?1 ORDER BY id DESC LIMIT 1 OFFSET ?2"
                ),
                params![chapter, steps],
                chapter_from_row,
            )
            .optional()?
            .filter(|row| steps > 0 || row.id == chapter))
    }

    pub fn first_unstarted_chapter(&self) -> Result<Option<ChapterRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {CHAPTER_COLUMNS} FROM chapter \
                     WHERE conversation_id IS NULL ORDER BY id ASC LIMIT 1"
                ),
                [],
                chapter_from_row,
            )
            .optional()?)
    }
}

impl WriteTx<'_> {
    /// Ingests a chapter. Its current pointers are materialised immediately
    /// so readers at the new chapter see everything visible before it.
    pub fn add_chapter(&self, request: AddChapterRequest) -> Result<ChapterRow, StoreError> {
        if request.id < 0 {
            return Err(StoreError::InvalidInput("chapter id must be >= 0"));
        }
        let name = ChapterName::try_new(request.name)
            .map_err(|err| StoreError::InvalidInput(err.message()))?;
        let name_json = serde_json::to_string(name.parts())?;

        let inserted = self.conn().execute(
            "INSERT INTO chapter(id, name, text) VALUES (?1, ?2, ?3)",
            params![request.id, name_json, request.text],
        );
        if let Err(err) = inserted {
            if is_constraint_violation(&err) {
                return Err(StoreError::InvalidInput("chapter id or name already exists"));
            }
            return Err(err.into());
        }

        self.materialize_chapter_pointers(request.id)?;
        info!(chapter = request.id, name = %name.display_path(), "chapter added");

        Ok(ChapterRow {
            id: request.id,
            name: name.into_parts(),
            text: request.text,
            conversation_id: None,
            chapter_summary_page_id: None,
        })
    }

    /// Marks `chapter_id` as being processed by `conversation_id`. Fails when
    /// the chapter was already started.
    pub(crate) fn start_chapter(&self, chapter_id: i64, conversation_id: i64) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE chapter SET conversation_id=?2 WHERE id=?1 AND conversation_id IS NULL",
            params![chapter_id, conversation_id],
        )?;
        if changed != 1 {
            self.view().require_chapter(chapter_id)?;
            return Err(StoreError::InvalidInput("chapter already started"));
        }
        Ok(())
    }

    pub fn set_chapter_summary(&self, chapter_id: i64, page_id: i64) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE chapter SET chapter_summary_page_id=?2 WHERE id=?1",
            params![chapter_id, page_id],
        )?;
        if changed != 1 {
            return Err(StoreError::UnknownChapter(chapter_id));
        }
        Ok(())
    }
}

impl SqliteStore {
    pub fn add_chapter(&mut self, request: AddChapterRequest) -> Result<ChapterRow, StoreError> {
        self.write("add_chapter", |tx| tx.add_chapter(request))
    }
}

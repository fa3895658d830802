#![forbid(unsafe_code)]

mod read;
mod repair;
mod write;

use super::{WikiPageRow, invalid_column};
use rusqlite::Row;

pub(super) const PAGE_COLUMNS: &str =
    "w.id, w.chapter, w.slug, w.create_time, w.create_block, w.title, w.names, w.summary, w.body";

/// Selects, for every chapter `c.id`, the newest non-deleted revision of each
/// slug authored at or before it. Newest is greatest `(create_time, id)`.
pub(super) const VISIBLE_PAIRS_SQL: &str = "\
    SELECT c.id, w.slug, w.id FROM chapter c \
    JOIN wiki_page w ON w.chapter <= c.id \
    WHERE w.title <> '' \
      AND NOT EXISTS ( \
        SELECT 1 FROM wiki_page n \
        WHERE n.slug = w.slug AND n.chapter <= c.id \
          AND (n.create_time > w.create_time OR (n.create_time = w.create_time AND n.id > w.id)) \
      )";

/// [`VISIBLE_PAIRS_SQL`] restricted to the single chapter bound as `?1`.
pub(super) const VISIBLE_AT_CHAPTER_SQL: &str = "\
    SELECT ?1, w.slug, w.id FROM wiki_page w \
    WHERE w.chapter <= ?1 AND w.title <> '' \
      AND NOT EXISTS ( \
        SELECT 1 FROM wiki_page n \
        WHERE n.slug = w.slug AND n.chapter <= ?1 \
          AND (n.create_time > w.create_time OR (n.create_time = w.create_time AND n.id > w.id)) \
      )";

pub(super) fn page_from_row(row: &Row<'_>) -> rusqlite::Result<WikiPageRow> {
    let raw_names: String = row.get(6)?;
    let names: Vec<String> = serde_json::from_str(&raw_names)
        .map_err(|_| invalid_column(6, "page names are not a string array"))?;
    Ok(WikiPageRow {
        id: row.get(0)?,
        chapter: row.get(1)?,
        slug: row.get(2)?,
        create_time: row.get(3)?,
        create_block: row.get(4)?,
        title: row.get(5)?,
        names,
        summary: row.get(7)?,
        body: row.get(8)?,
    })
}

#![forbid(unsafe_code)]

use super::{PAGE_COLUMNS, page_from_row};
use crate::store::{ChapterPageChanges, StoreError, StoreView, WikiPageRow};
use bw_core::links::links_to;
use rusqlite::{OptionalExtension, params};
use std::collections::BTreeSet;

fn guard_pointer(chapter: i64, slug: &str, page: &WikiPageRow) -> Result<(), StoreError> {
    let detail = if page.chapter > chapter {
        format!(
            "pointer references revision {} authored in later chapter {}",
            page.id, page.chapter
        )
    } else if page.slug != slug {
        format!(
            "pointer references revision {} of slug {}",
            page.id, page.slug
        )
    } else if page.is_tombstone() {
        format!("pointer references deleted revision {}", page.id)
    } else {
        return Ok(());
    };
    Err(StoreError::ConsistencyViolation {
        chapter,
        slug: slug.to_string(),
        detail,
    })
}

impl StoreView<'_> {
    /// The revision a reader who has finished `chapter` sees for `slug`.
    pub fn read_current(&self, chapter: i64, slug: &str) -> Result<Option<WikiPageRow>, StoreError> {
        let page = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PAGE_COLUMNS} FROM wiki_page_current cur \
                     JOIN wiki_page w ON w.id = cur.wiki_page \
                     WHERE cur.chapter=?1 AND cur.slug=?2"
                ),
                params![chapter, slug],
                page_from_row,
            )
            .optional()?;
        match page {
            Some(page) => {
                guard_pointer(chapter, slug, &page)?;
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    /// Every current page at `chapter`, ordered by title.
    pub fn read_current_all(&self, chapter: i64) -> Result<Vec<WikiPageRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT cur.slug, {PAGE_COLUMNS} FROM wiki_page_current cur \
             JOIN wiki_page w ON w.id = cur.wiki_page \
             WHERE cur.chapter=?1 \
             ORDER BY w.title ASC, cur.slug ASC"
        ))?;
        let mut rows = stmt.query(params![chapter])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let pointer_slug: String = row.get(0)?;
            let page = page_from_offset_row(row)?;
            guard_pointer(chapter, &pointer_slug, &page)?;
            out.push(page);
        }
        Ok(out)
    }

    /// Reference definition of visibility, computed from the revision log
    /// without the pointer table.
    pub fn read_visible_lazy(&self, chapter: i64, slug: &str) -> Result<Option<WikiPageRow>, StoreError> {
        let newest = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PAGE_COLUMNS} FROM wiki_page w \
                     WHERE w.slug=?1 AND w.chapter <= ?2 \
                     ORDER BY w.create_time DESC, w.id DESC LIMIT 1"
                ),
                params![slug, chapter],
                page_from_row,
            )
            .optional()?;
        Ok(newest.filter(|page| !page.is_tombstone()))
    }

    /// All revisions of `slug`, oldest first. Not spoiler-filtered.
    pub fn read_history(&self, slug: &str) -> Result<Vec<WikiPageRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PAGE_COLUMNS} FROM wiki_page w \
             WHERE w.slug=?1 ORDER BY w.create_time ASC, w.id ASC"
        ))?;
        let rows = stmt.query_map(params![slug], page_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_page(&self, id: i64) -> Result<Option<WikiPageRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM wiki_page w WHERE w.id=?1"),
                params![id],
                page_from_row,
            )
            .optional()?)
    }

    pub fn slugs_at(&self, chapter: i64) -> Result<BTreeSet<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT slug FROM wiki_page_current WHERE chapter=?1")?;
        let rows = stmt.query_map(params![chapter], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
    }

    /// Current pages at `chapter` (other than `slug` itself) whose body links
    /// to `slug`.
    pub fn pages_linking_to(&self, chapter: i64, slug: &str) -> Result<Vec<WikiPageRow>, StoreError> {
        Ok(self
            .read_current_all(chapter)?
            .into_iter()
            .filter(|page| page.slug != slug && links_to(&page.body, slug))
            .collect())
    }

    /// Pages whose current revision at `chapter` was authored in `chapter`,
    /// split by whether the slug was visible before it.
    pub fn chapter_page_changes(&self, chapter: i64) -> Result<ChapterPageChanges, StoreError> {
        let previous: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(id) FROM chapter WHERE id < ?1",
                params![chapter],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let visible_before = match previous {
            Some(previous) => self.slugs_at(previous)?,
            None => BTreeSet::new(),
        };

        let mut changes = ChapterPageChanges::default();
        for page in self.read_current_all(chapter)? {
            if page.chapter != chapter {
                continue;
            }
            if visible_before.contains(&page.slug) {
                changes.updated.push(page);
            } else {
                changes.created.push(page);
            }
        }
        Ok(changes)
    }
}

fn page_from_offset_row(row: &rusqlite::Row<'_>) -> Result<WikiPageRow, StoreError> {
    let raw_names: String = row.get(7)?;
    Ok(WikiPageRow {
        id: row.get(1)?,
        chapter: row.get(2)?,
        slug: row.get(3)?,
        create_time: row.get(4)?,
        create_block: row.get(5)?,
        title: row.get(6)?,
        names: serde_json::from_str(&raw_names)?,
        summary: row.get(8)?,
        body: row.get(9)?,
    })
}

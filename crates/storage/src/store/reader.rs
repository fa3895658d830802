#![forbid(unsafe_code)]

//! Read-only surface for wiki readers. Everything except `page_history` is
//! filtered to what a reader who finished the given chapter may see.

use super::{StoreError, StoreView, WikiPageRow};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WikiPageView {
    pub slug: String,
    pub chapter: i64,
    pub title: String,
    pub names: Vec<String>,
    pub summary: String,
    pub body: String,
    pub create_time: String,
    pub deleted: bool,
}

impl From<WikiPageRow> for WikiPageView {
    fn from(row: WikiPageRow) -> Self {
        let deleted = row.is_tombstone();
        Self {
            slug: row.slug,
            chapter: row.chapter,
            title: row.title,
            names: row.names,
            summary: row.summary,
            body: row.body,
            create_time: row.create_time,
            deleted,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NameIndexEntry {
    pub name: String,
    pub slug: String,
}

impl StoreView<'_> {
    pub fn current_wiki_state(&self, chapter: i64, slug: &str) -> Result<Option<WikiPageView>, StoreError> {
        Ok(self.read_current(chapter, slug)?.map(WikiPageView::from))
    }

    pub fn current_wiki_state_all(&self, chapter: i64) -> Result<Vec<WikiPageView>, StoreError> {
        Ok(self
            .read_current_all(chapter)?
            .into_iter()
            .map(WikiPageView::from)
            .collect())
    }

    /// Every revision ever written for `slug`, deletions included. Audit view.
    pub fn page_history(&self, slug: &str) -> Result<Vec<WikiPageView>, StoreError> {
        Ok(self
            .read_history(slug)?
            .into_iter()
            .map(WikiPageView::from)
            .collect())
    }

    pub fn names_index(&self, as_of_chapter: i64) -> Result<Vec<NameIndexEntry>, StoreError> {
        Ok(self
            .name_slug_pairs(as_of_chapter)?
            .into_iter()
            .map(|(name, slug)| NameIndexEntry { name, slug })
            .collect())
    }
}

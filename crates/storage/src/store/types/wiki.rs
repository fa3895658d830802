#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WikiPageRow {
    pub id: i64,
    pub chapter: i64,
    pub slug: String,
    pub create_time: String,
    pub create_block: i64,
    pub title: String,
    pub names: Vec<String>,
    pub summary: String,
    pub body: String,
}

impl WikiPageRow {
    /// An empty title marks the slug as deleted from this chapter on.
    pub fn is_tombstone(&self) -> bool {
        self.title.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChapterPageChanges {
    /// Slugs that first became visible in the chapter.
    pub created: Vec<WikiPageRow>,
    /// Slugs visible before the chapter that got a new revision in it.
    pub updated: Vec<WikiPageRow>,
}

/// A disagreement between the materialised pointer table and the revision log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentMismatch {
    pub chapter: i64,
    pub slug: String,
    pub materialized: Option<i64>,
    pub expected: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameMatch {
    pub page: WikiPageRow,
    pub alias_hits: usize,
    pub mention_hits: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameKind {
    Alias,
    Mention,
}

impl NameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alias => "alias",
            Self::Mention => "mention",
        }
    }
}

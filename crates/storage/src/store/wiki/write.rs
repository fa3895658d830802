#![forbid(unsafe_code)]

use crate::store::support::next_create_time;
use crate::store::{SqliteStore, StoreError, WikiPageRow, WriteRevisionRequest, WriteTx};
use bw_core::Slug;
use bw_core::names::dedupe_names;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

const MAX_TITLE_LEN: usize = 512;
const MAX_SUMMARY_LEN: usize = 4 * 1024;
const MAX_BODY_LEN: usize = 256 * 1024;
const MAX_NAMES: usize = 64;

struct NormalizedRevision {
    slug: Slug,
    title: String,
    names: Vec<String>,
    summary: String,
    body: String,
}

fn normalize_revision(request: &WriteRevisionRequest) -> Result<NormalizedRevision, StoreError> {
    let slug = Slug::try_new(request.slug.clone())
        .map_err(|err| StoreError::InvalidInput(err.message()))?;

    if request.title.is_empty() {
        return Ok(NormalizedRevision {
            slug,
            title: String::new(),
            names: Vec::new(),
            summary: String::new(),
            body: String::new(),
        });
    }

    if request.title.trim().is_empty() {
        return Err(StoreError::InvalidInput("title must not be blank"));
    }
    if request.title.len() > MAX_TITLE_LEN {
        return Err(StoreError::InvalidInput("title is too long"));
    }
    if request.summary.len() > MAX_SUMMARY_LEN {
        return Err(StoreError::InvalidInput("summary is too long"));
    }
    if request.body.len() > MAX_BODY_LEN {
        return Err(StoreError::InvalidInput("body is too long"));
    }
    if request.names.len() > MAX_NAMES {
        return Err(StoreError::InvalidInput("too many names"));
    }
    let names = dedupe_names(&request.names);
    if names.iter().all(|name| name.trim().is_empty()) {
        return Err(StoreError::InvalidInput(
            "wiki pages must have at least one name",
        ));
    }

    Ok(NormalizedRevision {
        slug,
        title: request.title.clone(),
        names,
        summary: request.summary.clone(),
        body: request.body.clone(),
    })
}

impl WriteTx<'_> {
    /// Appends an immutable revision and moves the current pointers of its
    /// chapter and every later chapter onto it. An empty title deletes the
    /// slug over the same range.
    pub fn write_revision(&self, request: WriteRevisionRequest) -> Result<WikiPageRow, StoreError> {
        let revision = normalize_revision(&request)?;
        let slug = revision.slug.as_str();
        let conn = self.conn();

        self.view().require_chapter(request.chapter)?;
        self.view().require_block(request.author_block)?;

        let later_chapter: Option<i64> = conn
            .query_row(
                "SELECT MAX(chapter) FROM wiki_page WHERE slug=?1 AND chapter > ?2",
                params![slug, request.chapter],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        if let Some(later_chapter) = later_chapter {
            return Err(StoreError::SlugConflict {
                slug: slug.to_string(),
                later_chapter,
            });
        }

        let create_time = next_create_time(conn, "wiki_page")?;
        let names_json = serde_json::to_string(&revision.names)?;
        conn.execute(
            "INSERT INTO wiki_page(chapter, slug, create_time, create_block, title, names, summary, body) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                request.chapter,
                slug,
                create_time,
                request.author_block,
                revision.title,
                names_json,
                revision.summary,
                revision.body
            ],
        )?;
        let id = conn.last_insert_rowid();

        let page = WikiPageRow {
            id,
            chapter: request.chapter,
            slug: slug.to_string(),
            create_time,
            create_block: request.author_block,
            title: revision.title,
            names: revision.names,
            summary: revision.summary,
            body: revision.body,
        };

        let pointers = if page.is_tombstone() {
            conn.execute(
                "DELETE FROM wiki_page_current WHERE slug=?1 AND chapter >= ?2",
                params![slug, request.chapter],
            )?
        } else {
            conn.execute(
                "INSERT INTO wiki_page_current(chapter, slug, wiki_page) \
                 SELECT id, ?1, ?2 FROM chapter WHERE id >= ?3 \
                 ON CONFLICT(chapter, slug) DO UPDATE SET wiki_page=excluded.wiki_page",
                params![slug, id, request.chapter],
            )?
        };

        self.reindex(&page)?;

        debug!(
            chapter = page.chapter,
            slug = %page.slug,
            revision = page.id,
            block_id = page.create_block,
            tombstone = page.is_tombstone(),
            pointers,
            "wiki revision written"
        );
        Ok(page)
    }
}

impl SqliteStore {
    pub fn write_revision(&mut self, request: WriteRevisionRequest) -> Result<WikiPageRow, StoreError> {
        self.write("write_revision", |tx| tx.write_revision(request))
    }
}

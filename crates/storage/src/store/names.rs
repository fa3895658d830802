#![forbid(unsafe_code)]

use super::wiki::{PAGE_COLUMNS, page_from_row};
use super::{NameKind, NameMatch, SqliteStore, StoreError, StoreView, WikiPageRow, WriteTx};
use bw_core::links::extract_wiki_links;
use bw_core::names::{dedupe_names, normalize_name_key};
use rusqlite::params;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Names attached to a revision: its authored names as aliases and the
/// display text of every link in its body as mentions. A mention whose key
/// matches an alias is dropped.
fn names_for(page: &WikiPageRow) -> Vec<(String, NameKind)> {
    if page.is_tombstone() {
        return Vec::new();
    }
    let aliases = dedupe_names(&page.names);
    let alias_keys: BTreeSet<String> = aliases.iter().map(|n| normalize_name_key(n)).collect();

    let link_texts: Vec<String> = extract_wiki_links(&page.body)
        .into_iter()
        .map(|link| link.display_text)
        .collect();
    let mentions = if link_texts.is_empty() {
        Vec::new()
    } else {
        dedupe_names(&link_texts)
    };

    let mut out: Vec<(String, NameKind)> = aliases
        .into_iter()
        .filter(|name| !normalize_name_key(name).is_empty())
        .map(|name| (name, NameKind::Alias))
        .collect();
    for name in mentions {
        let key = normalize_name_key(&name);
        if key.is_empty() || alias_keys.contains(&key) {
            continue;
        }
        out.push((name, NameKind::Mention));
    }
    out
}

impl WriteTx<'_> {
    /// Replaces the name associations of one revision. Safe to repeat.
    pub fn reindex(&self, page: &WikiPageRow) -> Result<usize, StoreError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM wiki_page_name WHERE wiki_page_id=?1",
            params![page.id],
        )?;

        let names = names_for(page);
        for (name, kind) in &names {
            conn.execute(
                "INSERT OR IGNORE INTO wiki_name(name, name_key) VALUES (?1, ?2)",
                params![name, normalize_name_key(name)],
            )?;
            let name_id: i64 = conn.query_row(
                "SELECT id FROM wiki_name WHERE name=?1",
                params![name],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO wiki_page_name(wiki_page_id, wiki_name_id, kind) \
                 VALUES (?1, ?2, ?3)",
                params![page.id, name_id, kind.as_str()],
            )?;
        }
        Ok(names.len())
    }

    /// Rebuilds every revision's associations from page content.
    pub fn reindex_all(&self) -> Result<usize, StoreError> {
        let pages = {
            let mut stmt = self
                .conn()
                .prepare(&format!("SELECT {PAGE_COLUMNS} FROM wiki_page w ORDER BY w.id"))?;
            let rows = stmt.query_map([], page_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        self.conn().execute("DELETE FROM wiki_page_name", [])?;
        let mut total = 0;
        for page in &pages {
            total += self.reindex(page)?;
        }
        info!(revisions = pages.len(), names = total, "name index rebuilt");
        Ok(total)
    }
}

impl StoreView<'_> {
    /// Slugs whose current revision at `as_of_chapter` carries `name` either
    /// as an alias or as a link mention. Matching is by normalised key.
    pub fn pages_mentioning(&self, name: &str, as_of_chapter: i64) -> Result<BTreeSet<String>, StoreError> {
        let key = normalize_name_key(name);
        if key.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT cur.slug FROM wiki_page_current cur \
             JOIN wiki_page_name pn ON pn.wiki_page_id = cur.wiki_page \
             JOIN wiki_name n ON n.id = pn.wiki_name_id \
             WHERE cur.chapter=?1 AND n.name_key=?2",
        )?;
        let rows = stmt.query_map(params![as_of_chapter, key], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
    }

    /// Current pages matching any of `names`, best first: more alias hits,
    /// then more mention hits, then title.
    pub fn pages_named(&self, names: &[String], as_of_chapter: i64) -> Result<Vec<NameMatch>, StoreError> {
        let keys: BTreeSet<String> = names
            .iter()
            .map(|name| normalize_name_key(name))
            .filter(|key| !key.is_empty())
            .collect();

        let mut hits: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT cur.wiki_page, pn.kind FROM wiki_page_current cur \
                 JOIN wiki_page_name pn ON pn.wiki_page_id = cur.wiki_page \
                 JOIN wiki_name n ON n.id = pn.wiki_name_id \
                 WHERE cur.chapter=?1 AND n.name_key=?2",
            )?;
            for key in &keys {
                let mut rows = stmt.query(params![as_of_chapter, key])?;
                while let Some(row) = rows.next()? {
                    let page_id: i64 = row.get(0)?;
                    let kind: String = row.get(1)?;
                    let entry = hits.entry(page_id).or_default();
                    if kind == NameKind::Alias.as_str() {
                        entry.0 += 1;
                    } else {
                        entry.1 += 1;
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(hits.len());
        for (page_id, (alias_hits, mention_hits)) in hits {
            if let Some(page) = self.get_page(page_id)? {
                out.push(NameMatch {
                    page,
                    alias_hits,
                    mention_hits,
                });
            }
        }
        out.sort_by(|a, b| {
            b.alias_hits
                .cmp(&a.alias_hits)
                .then(b.mention_hits.cmp(&a.mention_hits))
                .then_with(|| a.page.title.cmp(&b.page.title))
                .then_with(|| a.page.slug.cmp(&b.page.slug))
        });
        Ok(out)
    }

    /// `(name, slug)` for every authored name of every current page at
    /// `as_of_chapter`, sorted by name.
    pub fn name_slug_pairs(&self, as_of_chapter: i64) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT n.name, cur.slug FROM wiki_page_current cur \
             JOIN wiki_page_name pn ON pn.wiki_page_id = cur.wiki_page \
             JOIN wiki_name n ON n.id = pn.wiki_name_id \
             WHERE cur.chapter=?1 AND pn.kind='alias' \
             ORDER BY n.name ASC, cur.slug ASC",
        )?;
        let rows = stmt.query_map(params![as_of_chapter], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl SqliteStore {
    pub fn reindex_all(&mut self) -> Result<usize, StoreError> {
        self.write("reindex_all", |tx| tx.reindex_all())
    }
}

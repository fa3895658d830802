#![forbid(unsafe_code)]

use super::{ToolContext, ToolError};
use bw_core::links::{extract_wiki_links, rewrite_links};
use bw_storage::{StoreView, WikiPageRow, WriteRevisionRequest, WriteTx};
use serde::Deserialize;
use tracing::info;

const SEARCH_PAGE_SIZE: usize = 6;
const MAX_SUGGESTIONS: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadWikiPage {
    pub slug: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchWikiByName {
    pub names: Vec<String>,
    #[serde(default)]
    pub results_page: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteWikiPage {
    pub slug: String,
    pub create: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub delete_and_redirect_to: Option<String>,
}

/// Current pages whose names resemble `slug`, for "did you mean" hints.
fn similar_pages(view: StoreView<'_>, chapter: i64, slug: &str) -> Result<Vec<WikiPageRow>, ToolError> {
    Ok(view
        .pages_named(&[slug.to_string()], chapter)?
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|hit| hit.page)
        .collect())
}

impl ReadWikiPage {
    pub(super) fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<String, ToolError> {
        let chapter = ctx.conversation.chapter;
        let view = tx.view();
        if let Some(page) = view.read_current(chapter, &self.slug)? {
            return Ok(format!(
                "# {}\nKnown names: {}\nSummary: {}\n\n{}",
                page.title,
                page.names.join(", "),
                page.summary,
                page.body
            ));
        }

        let similar = similar_pages(view, chapter, &self.slug)?;
        if similar.is_empty() {
            return Err(ToolError::rejected(format!(
                "No page exists with slug '{}'",
                self.slug
            )));
        }
        let suggestions: Vec<String> = similar
            .iter()
            .map(|page| format!("  - {} ({}) {}", page.title, page.slug, page.summary))
            .collect();
        Err(ToolError::rejected(format!(
            "No page exists with slug '{}'.\n\nDid you mean one of these?\n{}",
            self.slug,
            suggestions.join("\n")
        )))
    }
}

impl SearchWikiByName {
    pub(super) fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<String, ToolError> {
        let page = self.results_page.unwrap_or(1);
        if page < 1 {
            return Err(ToolError::rejected("results_page must be 1 or greater"));
        }
        if self.names.iter().all(|name| name.trim().is_empty()) {
            return Err(ToolError::rejected("Provide at least one name to search for"));
        }

        let hits = tx.view().pages_named(&self.names, ctx.conversation.chapter)?;
        let total = hits.len();
        let skip = usize::try_from(page - 1)
            .unwrap_or(usize::MAX)
            .saturating_mul(SEARCH_PAGE_SIZE);
        let results: Vec<String> = hits
            .iter()
            .enumerate()
            .skip(skip)
            .take(SEARCH_PAGE_SIZE)
            .map(|(index, hit)| {
                format!(
                    "{}. {} - {}\n   Names: {}\n   Summary: {}",
                    index + 1,
                    hit.page.title,
                    hit.page.slug,
                    hit.page.names.join(", "),
                    hit.page.summary
                )
            })
            .collect();

        if results.is_empty() {
            return Ok(if page == 1 {
                "No wiki pages found.".to_string()
            } else {
                format!("No results found on page {page}")
            });
        }
        Ok(format!(
            "Search Results (Page {page}, showing {} of {total} total):\n\n{}",
            results.len(),
            results.join("\n\n")
        ))
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

fn broken_links(view: StoreView<'_>, chapter: i64, slug: &str, body: &str) -> Result<Vec<String>, ToolError> {
    let known = view.slugs_at(chapter)?;
    let mut broken = Vec::new();
    for link in extract_wiki_links(body) {
        if link.slug == slug || known.contains(&link.slug) {
            continue;
        }
        let line = format!("- Slug '{}' does not reference a page in the wiki", link.slug);
        if !broken.contains(&line) {
            broken.push(line);
        }
    }
    Ok(broken)
}

/// Tombstones `slug` at `chapter` after repointing every current page that
/// links to it. An empty `redirect_to` replaces those links with their text.
pub(super) fn delete_and_redirect(
    tx: &WriteTx<'_>,
    chapter: i64,
    slug: &str,
    redirect_to: &str,
    author_block: i64,
) -> Result<String, ToolError> {
    let linking = tx.view().pages_linking_to(chapter, slug)?;
    for page in &linking {
        tx.write_revision(WriteRevisionRequest {
            chapter,
            slug: page.slug.clone(),
            author_block,
            title: page.title.clone(),
            names: page.names.clone(),
            summary: page.summary.clone(),
            body: rewrite_links(&page.body, slug, redirect_to),
        })?;
    }
    tx.write_revision(WriteRevisionRequest::tombstone(chapter, slug, author_block))?;
    info!(
        chapter,
        slug,
        redirect_to,
        block_id = author_block,
        relinked = linking.len(),
        "wiki page deleted"
    );

    let mut response = if redirect_to.is_empty() {
        format!("Wiki page '{slug}' deleted and all links removed.")
    } else {
        format!("Wiki page '{slug}' deleted and redirected to '{redirect_to}'.")
    };
    if !linking.is_empty() {
        response.push_str(&format!(
            " Updated {} page(s) with redirected links.",
            linking.len()
        ));
    }
    Ok(response)
}

impl WriteWikiPage {
    pub(super) fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<String, ToolError> {
        let chapter = ctx.conversation.chapter;
        let view = tx.view();
        let existing = view.read_current(chapter, &self.slug)?;

        if let Some(target) = &self.delete_and_redirect_to {
            return self.apply_delete(tx, ctx, existing.is_some(), target);
        }

        let request = if self.create {
            if existing.is_some() {
                return Err(ToolError::rejected(
                    "That slug already exists, but create was specified",
                ));
            }
            let (Some(title), Some(names), Some(summary), Some(body)) =
                (&self.title, &self.names, &self.summary, &self.body)
            else {
                return Err(ToolError::rejected(
                    "All fields must be set when creating a new page",
                ));
            };
            if title.trim().is_empty() || names.is_empty() || summary.trim().is_empty() || body.trim().is_empty() {
                return Err(ToolError::rejected(
                    "All fields must be set when creating a new page",
                ));
            }
            let broken = broken_links(view, chapter, &self.slug, body)?;
            if !broken.is_empty() {
                return Err(ToolError::rejected(format!(
                    "Cannot create wiki page with broken links:\n{}",
                    broken.join("\n")
                )));
            }
            WriteRevisionRequest {
                chapter,
                slug: self.slug.clone(),
                author_block: ctx.block_id,
                title: title.clone(),
                names: names.clone(),
                summary: summary.clone(),
                body: body.clone(),
            }
        } else {
            let Some(page) = existing else {
                return Err(ToolError::rejected(
                    "No such slug exists, but create was not specified",
                ));
            };
            let body = self
                .body
                .clone()
                .filter(|b| !b.is_empty())
                .unwrap_or(page.body);
            let broken = broken_links(view, chapter, &self.slug, &body)?;
            if !broken.is_empty() {
                return Err(ToolError::rejected(format!(
                    "Cannot update wiki page with broken links:\n{}",
                    broken.join("\n")
                )));
            }
            WriteRevisionRequest {
                chapter,
                slug: self.slug.clone(),
                author_block: ctx.block_id,
                title: self.title.clone().filter(|t| !t.is_empty()).unwrap_or(page.title),
                names: self.names.clone().filter(|n| !n.is_empty()).unwrap_or(page.names),
                summary: self
                    .summary
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or(page.summary),
                body,
            }
        };

        let written = tx.write_revision(request)?;
        info!(
            conversation_id = ctx.conversation.id,
            chapter,
            slug = %written.slug,
            block_id = ctx.block_id,
            created = self.create,
            "wiki page written"
        );
        Ok("Wrote wiki page".to_string())
    }

    fn apply_delete(
        &self,
        tx: &WriteTx<'_>,
        ctx: ToolContext<'_>,
        exists: bool,
        target: &str,
    ) -> Result<String, ToolError> {
        let chapter = ctx.conversation.chapter;
        if !exists {
            return Err(ToolError::rejected(
                "Cannot delete non-existent page - no such slug exists",
            ));
        }
        if target == self.slug {
            return Err(ToolError::rejected(
                "Cannot redirect a page to itself. The redirect target must be a different page.",
            ));
        }
        if !target.is_empty() && tx.view().read_current(chapter, target)?.is_none() {
            let similar = similar_pages(tx.view(), chapter, target)?;
            let mut message = format!("Cannot redirect to non-existent page '{target}'");
            if !similar.is_empty() {
                let suggestions: Vec<String> = similar
                    .iter()
                    .map(|page| format!("  - {} ({})", page.title, page.slug))
                    .collect();
                message.push_str(".\n\nDid you mean one of these?\n");
                message.push_str(&suggestions.join("\n"));
            }
            return Err(ToolError::rejected(message));
        }
        let has_names = self
            .names
            .as_ref()
            .is_some_and(|names| names.iter().any(|name| !name.trim().is_empty()));
        if has_text(self.title.as_deref())
            || has_names
            || has_text(self.summary.as_deref())
            || has_text(self.body.as_deref())
        {
            return Err(ToolError::rejected(
                "Cannot set content fields (title, names, summary, body) when using \
                 delete_and_redirect_to. Either set delete_and_redirect_to or provide content, not both.",
            ));
        }
        delete_and_redirect(tx, chapter, &self.slug, target, ctx.block_id)
    }
}

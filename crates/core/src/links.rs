#![forbid(unsafe_code)]

//! Markdown wiki links of the form `[display text](target)`.

/// A link found in a page body. `slug` is the last path component of the
/// target, so `[Bree](../bree/)` and `[Bree](bree)` both point at `bree`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WikiLink {
    pub display_text: String,
    pub target: String,
    pub slug: String,
}

pub fn slug_from_target(target: &str) -> &str {
    let trimmed = target.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Byte span of a link match inside the body it was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LinkSpan {
    start: usize,
    text_end: usize,
    target_start: usize,
    end: usize,
}

/// Finds the leftmost link starting at `open` (which must be a `[`).
/// Display text is one or more non-`]` characters and the target is one or
/// more non-`)` characters.
fn match_at(body: &str, open: usize) -> Option<LinkSpan> {
    let bytes = body.as_bytes();
    let close = open + 1 + body[open + 1..].find(']')?;
    if close == open + 1 {
        return None;
    }
    if bytes.get(close + 1) != Some(&b'(') {
        return None;
    }
    let target_start = close + 2;
    let target_close = target_start + body[target_start..].find(')')?;
    if target_close == target_start {
        return None;
    }
    Some(LinkSpan {
        start: open,
        text_end: close,
        target_start,
        end: target_close + 1,
    })
}

fn spans(body: &str) -> Vec<LinkSpan> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(rel) = body[cursor..].find('[') {
        let open = cursor + rel;
        match match_at(body, open) {
            Some(span) => {
                cursor = span.end;
                out.push(span);
            }
            None => cursor = open + 1,
        }
    }
    out
}

pub fn extract_wiki_links(body: &str) -> Vec<WikiLink> {
    spans(body)
        .into_iter()
        .map(|span| {
            let target = &body[span.target_start..span.end - 1];
            WikiLink {
                display_text: body[span.start + 1..span.text_end].to_string(),
                target: target.to_string(),
                slug: slug_from_target(target).to_string(),
            }
        })
        .collect()
}

/// Rewrites every link whose slug is `old_slug`. With `new_slug` empty the
/// link is replaced by its display text; otherwise the last path component
/// of the target is swapped and any prefix kept.
pub fn rewrite_links(body: &str, old_slug: &str, new_slug: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for span in spans(body) {
        let display = &body[span.start + 1..span.text_end];
        let target = &body[span.target_start..span.end - 1];
        if slug_from_target(target) != old_slug {
            continue;
        }
        out.push_str(&body[last..span.start]);
        if new_slug.is_empty() {
            out.push_str(display);
        } else {
            let new_target = match target.trim_end_matches('/').rfind('/') {
                Some(idx) => format!("{}/{new_slug}", &target[..idx]),
                None => new_slug.to_string(),
            };
            out.push('[');
            out.push_str(display);
            out.push_str("](");
            out.push_str(&new_target);
            out.push(')');
        }
        last = span.end;
    }
    out.push_str(&body[last..]);
    out
}

pub fn links_to(body: &str, slug: &str) -> bool {
    extract_wiki_links(body).iter().any(|link| link.slug == slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_links_and_slugs() {
        let body = "Met [Strider](aragorn) at [the inn](places/prancing-pony/) in [Bree](bree).";
        let links = extract_wiki_links(body);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].display_text, "Strider");
        assert_eq!(links[0].slug, "aragorn");
        assert_eq!(links[1].target, "places/prancing-pony/");
        assert_eq!(links[1].slug, "prancing-pony");
        assert_eq!(links[2].slug, "bree");
    }

    #[test]
    fn ignores_incomplete_syntax() {
        assert!(extract_wiki_links("[]() [x]() [](y) [x] (y) plain").is_empty());
        let nested = extract_wiki_links("[a [b](c)");
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].display_text, "a [b");
        assert_eq!(nested[0].slug, "c");
    }

    #[test]
    fn rewrite_redirects_and_keeps_prefix() {
        let body = "See [Strider](../aragorn/) and [him](aragorn), not [Bree](bree).";
        assert_eq!(
            rewrite_links(body, "aragorn", "elessar"),
            "See [Strider](../elessar) and [him](elessar), not [Bree](bree)."
        );
    }

    #[test]
    fn rewrite_with_empty_target_unlinks() {
        let body = "[Strider](aragorn) walked to [Bree](bree).";
        assert_eq!(
            rewrite_links(body, "aragorn", ""),
            "Strider walked to [Bree](bree)."
        );
        assert!(!links_to(&rewrite_links(body, "aragorn", ""), "aragorn"));
        assert!(links_to(body, "bree"));
    }
}

#![forbid(unsafe_code)]

//! Name normalisation and de-duplication for the wiki name index.

use std::collections::BTreeMap;

/// Folds a display name into its lookup key.
///
/// Punctuation becomes a space, underscores become spaces, whitespace runs
/// collapse, the result is lower-cased, and a leading `the ` is dropped when
/// something follows it. `"The  Harry-Potter!"` becomes `"harry potter"`.
pub fn normalize_name_key(name: &str) -> String {
    let mut spaced = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_alphanumeric() || ch.is_whitespace() {
            spaced.push(ch);
        } else {
            spaced.push(' ');
        }
    }

    let key = spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    match key.strip_prefix("the ") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => key,
    }
}

fn uppercase_count(name: &str) -> usize {
    name.chars().filter(|c| c.is_uppercase()).count()
}

fn best_of_group<'a>(group: &[&'a str]) -> &'a str {
    let mut best = group[0];
    for &candidate in &group[1..] {
        let candidate_rank = (candidate.chars().count(), uppercase_count(candidate), candidate);
        let best_rank = (best.chars().count(), uppercase_count(best), best);
        if candidate_rank > best_rank {
            best = candidate;
        }
    }
    best
}

/// Groups names by [`normalize_name_key`] and keeps one representative per
/// group: the longest, then the one with most upper-case letters, then the
/// lexicographically greatest. Output is sorted. Names whose key is empty are
/// dropped unless every name is empty-keyed, in which case the first is kept.
pub fn dedupe_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    if names.is_empty() {
        return Vec::new();
    }

    let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for name in names {
        let name = name.as_ref();
        let key = normalize_name_key(name);
        if key.is_empty() {
            continue;
        }
        groups.entry(key).or_default().push(name);
    }

    let mut out: Vec<String> = groups
        .values()
        .map(|group| best_of_group(group).to_string())
        .collect();

    if out.is_empty() {
        out.push(names[0].as_ref().to_string());
    }
    out.sort();
    out
}

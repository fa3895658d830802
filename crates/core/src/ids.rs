#![forbid(unsafe_code)]

/// Slug reserved for the page an agent writes before finishing a chapter.
pub const CHAPTER_SUMMARY_SLUG: &str = "chapter-summary";

const MAX_SLUG_LEN: usize = 200;
const MAX_PROMPT_KEY_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slug(String);

impl Slug {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, SlugError> {
        let value = value.into();
        validate_slug(&value)?;
        Ok(Self(value))
    }
}

impl std::fmt::Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlugError {
    Empty,
    TooLong,
    ContainsSlash,
    ContainsWhitespace,
    ContainsLinkSyntax,
    ContainsControl,
}

impl SlugError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "slug must not be empty",
            Self::TooLong => "slug is too long",
            Self::ContainsSlash => "slug must not contain '/'",
            Self::ContainsWhitespace => "slug must not contain whitespace",
            Self::ContainsLinkSyntax => "slug must not contain brackets or parentheses",
            Self::ContainsControl => "slug contains control characters",
        }
    }
}

fn validate_slug(value: &str) -> Result<(), SlugError> {
    if value.is_empty() {
        return Err(SlugError::Empty);
    }
    if value.len() > MAX_SLUG_LEN {
        return Err(SlugError::TooLong);
    }
    for ch in value.chars() {
        if ch == '/' {
            return Err(SlugError::ContainsSlash);
        }
        if ch.is_control() {
            return Err(SlugError::ContainsControl);
        }
        if ch.is_whitespace() {
            return Err(SlugError::ContainsWhitespace);
        }
        if matches!(ch, '[' | ']' | '(' | ')') {
            return Err(SlugError::ContainsLinkSyntax);
        }
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromptKey(String);

impl PromptKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, PromptKeyError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(PromptKeyError::Empty);
        }
        if trimmed.len() > MAX_PROMPT_KEY_LEN {
            return Err(PromptKeyError::TooLong);
        }
        if trimmed.chars().any(|c| c.is_control()) {
            return Err(PromptKeyError::ContainsControl);
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptKeyError {
    Empty,
    TooLong,
    ContainsControl,
}

impl PromptKeyError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "prompt key must not be empty",
            Self::TooLong => "prompt key is too long",
            Self::ContainsControl => "prompt key contains control characters",
        }
    }
}

/// Hierarchical chapter name, e.g. `["Part One", "Chapter 3"]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChapterName(Vec<String>);

impl ChapterName {
    pub fn try_new(parts: Vec<String>) -> Result<Self, ChapterNameError> {
        if parts.is_empty() {
            return Err(ChapterNameError::Empty);
        }
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(ChapterNameError::BlankPart);
        }
        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn into_parts(self) -> Vec<String> {
        self.0
    }

    /// Breadcrumb form used in chapter headers: `Part One > Chapter 3`.
    pub fn display_path(&self) -> String {
        self.0.join(" > ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChapterNameError {
    Empty,
    BlankPart,
}

impl ChapterNameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "chapter name must have at least one part",
            Self::BlankPart => "chapter name parts must not be blank",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation() {
        assert_eq!(Slug::try_new("").unwrap_err(), SlugError::Empty);
        assert_eq!(
            Slug::try_new("a/b").unwrap_err(),
            SlugError::ContainsSlash
        );
        assert_eq!(
            Slug::try_new("frodo baggins").unwrap_err(),
            SlugError::ContainsWhitespace
        );
        assert_eq!(
            Slug::try_new("bad(slug)").unwrap_err(),
            SlugError::ContainsLinkSyntax
        );
        assert_eq!(
            Slug::try_new("x".repeat(MAX_SLUG_LEN + 1)).unwrap_err(),
            SlugError::TooLong
        );
        assert!(Slug::try_new("aragorn-son-of-arathorn").is_ok());
        assert!(Slug::try_new(CHAPTER_SUMMARY_SLUG).is_ok());
    }

    #[test]
    fn prompt_key_is_trimmed() {
        let key = PromptKey::try_new("  character-analyzer ").expect("key");
        assert_eq!(key.as_str(), "character-analyzer");
        assert_eq!(PromptKey::try_new("   ").unwrap_err(), PromptKeyError::Empty);
    }

    #[test]
    fn chapter_name_path() {
        let name = ChapterName::try_new(vec!["Part One".into(), "Chapter 3".into()])
            .expect("name");
        assert_eq!(name.display_path(), "Part One > Chapter 3");
        assert_eq!(
            ChapterName::try_new(Vec::new()).unwrap_err(),
            ChapterNameError::Empty
        );
        assert_eq!(
            ChapterName::try_new(vec!["ok".into(), " ".into()]).unwrap_err(),
            ChapterNameError::BlankPart
        );
    }
}

#![forbid(unsafe_code)]

//! `$name` / `${name}` prompt templates. `$$` is a literal dollar sign.
//! Identifiers are ASCII letters, digits and underscores, not starting with
//! a digit.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateError {
    /// A `$` not followed by `$`, an identifier, or a braced identifier.
    InvalidPlaceholder { offset: usize },
    MissingValue { name: String },
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPlaceholder { offset } => {
                write!(f, "invalid placeholder at byte {offset}")
            }
            Self::MissingValue { name } => write!(f, "no value for variable '{name}'"),
        }
    }
}

impl std::error::Error for TemplateError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

fn is_ident_start(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphabetic()
}

fn is_ident_continue(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphanumeric()
}

fn ident_len(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(&b) if is_ident_start(b) => {
            1 + bytes[1..].iter().take_while(|&&b| is_ident_continue(b)).count()
        }
        _ => 0,
    }
}

fn parse(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let bytes = source.as_bytes();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    let mut run_start = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        literal.push_str(&source[run_start..i]);
        let rest = &bytes[i + 1..];
        if rest.first() == Some(&b'$') {
            literal.push('$');
            i += 2;
        } else if rest.first() == Some(&b'{') {
            let len = ident_len(&rest[1..]);
            if len == 0 || rest.get(1 + len) != Some(&b'}') {
                return Err(TemplateError::InvalidPlaceholder { offset: i });
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Variable(source[i + 2..i + 2 + len].to_string()));
            i += len + 3;
        } else {
            let len = ident_len(rest);
            if len == 0 {
                return Err(TemplateError::InvalidPlaceholder { offset: i });
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Variable(source[i + 1..i + 1 + len].to_string()));
            i += len + 1;
        }
        run_start = i;
    }
    literal.push_str(&source[run_start..]);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

impl PromptTemplate {
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let segments = parse(&source)?;
        Ok(Self { source, segments })
    }

    pub fn is_valid(source: &str) -> bool {
        parse(source).is_ok()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variable names in sorted order, without duplicates.
    pub fn identifiers(&self) -> BTreeSet<String> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Variable(name) => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn substitute(&self, values: &BTreeMap<String, String>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => {
                    let value = values
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingValue { name: name.clone() })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddChapterRequest {
    pub id: i64,
    pub name: Vec<String>,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRevisionRequest {
    pub chapter: i64,
    pub slug: String,
    pub author_block: i64,
    pub title: String,
    pub names: Vec<String>,
    pub summary: String,
    pub body: String,
}

impl WriteRevisionRequest {
    /// A revision that deletes `slug` from `chapter` onwards.
    pub fn tombstone(chapter: i64, slug: impl Into<String>, author_block: i64) -> Self {
        Self {
            chapter,
            slug: slug.into(),
            author_block,
            title: String::new(),
            names: Vec::new(),
            summary: String::new(),
            body: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatePromptRequest {
    pub key: String,
    pub create_block: Option<i64>,
    pub summary: String,
    pub template: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimRequest {
    pub worker_id: String,
    pub lease_ttl_ms: u64,
    pub now_ms: i64,
}

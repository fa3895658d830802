#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChapterRow {
    pub id: i64,
    pub name: Vec<String>,
    pub text: String,
    /// Root conversation processing this chapter; `None` until started.
    pub conversation_id: Option<i64>,
    pub chapter_summary_page_id: Option<i64>,
}

impl ChapterRow {
    pub fn is_started(&self) -> bool {
        self.conversation_id.is_some()
    }

    pub fn display_name(&self) -> String {
        self.name.join(" > ")
    }
}

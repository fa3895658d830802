#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptRow {
    pub key: String,
    pub create_time: String,
    pub create_block: Option<i64>,
    pub summary: String,
    pub template: String,
}

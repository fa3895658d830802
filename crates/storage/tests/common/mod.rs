#![forbid(unsafe_code)]
#![allow(dead_code)]

use bw_storage::{AddChapterRequest, NewBlock, SqliteStore, WriteRevisionRequest};
use serde_json::json;
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub store: SqliteStore,
}

pub fn open_store() -> Fixture {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = SqliteStore::open(dir.path()).expect("open store");
    Fixture { dir, store }
}

pub fn add_chapters(store: &mut SqliteStore, count: i64) {
    for id in 0..count {
        store
            .add_chapter(AddChapterRequest {
                id,
                name: vec![format!("Chapter {}", id + 1)],
                text: format!("Text of chapter {}.", id + 1),
            })
            .expect("add chapter");
    }
}

/// Starts chapter 0 and returns `(root conversation id, tool block id)` for
/// authoring wiki revisions.
pub fn author(store: &mut SqliteStore) -> (i64, i64) {
    let root = store
        .start_chapter_conversation(0, "Process the chapter.")
        .expect("start chapter");
    let block = tool_call(store, root.id, "WriteWikiPage", "toolu_author");
    (root.id, block)
}

pub fn tool_call(store: &mut SqliteStore, conversation_id: i64, name: &str, use_id: &str) -> i64 {
    store
        .append(
            conversation_id,
            NewBlock::ToolUse {
                name: name.to_string(),
                use_id: use_id.to_string(),
                params: json!({}),
            },
        )
        .expect("append tool call")
        .id
}

pub fn revision(chapter: i64, slug: &str, title: &str, author_block: i64) -> WriteRevisionRequest {
    WriteRevisionRequest {
        chapter,
        slug: slug.to_string(),
        author_block,
        title: title.to_string(),
        names: vec![title.to_string()],
        summary: format!("{title} summary"),
        body: format!("About {title}."),
    }
}

#![forbid(unsafe_code)]

mod common;

use bw_core::ConversationStatus;
use bw_runner::{TransportError, TurnRequest, TurnResponse, WorkerPool};
use common::{ManualClock, ScriptedTransport, add_chapters, call, config_for, reply, summary_page_call};
use serde_json::json;

fn summarize_then_finish(request: &TurnRequest) -> Result<TurnResponse, TransportError> {
    let id = format!("toolu_{}_{}", request.conversation_id, request.generation);
    if request.generation == 0 {
        reply(&["Summarising."], vec![summary_page_call(&id)])
    } else {
        reply(&[], vec![call(&id, "FinishChapter", json!({}))])
    }
}

#[test]
fn workers_share_one_book_without_double_sends() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut store = bw_storage::SqliteStore::open(dir.path()).expect("open store");
    add_chapters(&mut store, 3);

    let mut config = config_for(&dir);
    config.workers = 2;
    let transport = ScriptedTransport::with_handler(summarize_then_finish);
    let pool = WorkerPool::spawn(&config, transport.clone(), ManualClock::new());
    let summaries = pool.join().expect("workers");

    assert_eq!(summaries.len(), 2);
    let committed: u64 = summaries.iter().map(|summary| summary.committed_turns).sum();
    assert_eq!(committed, 6);
    assert!(summaries.iter().all(|summary| summary.failed_turns == 0));

    // Each (conversation, generation) pair reached the model exactly once.
    let mut sent: Vec<(i64, i64)> = transport
        .requests()
        .iter()
        .map(|request| (request.conversation_id, request.generation))
        .collect();
    sent.sort_unstable();
    let before = sent.len();
    sent.dedup();
    assert_eq!(sent.len(), before);
    assert_eq!(sent.len(), 6);

    let view = store.view();
    for chapter in view.chapters().expect("chapters") {
        let root = view
            .require_conversation(chapter.conversation_id.expect("started"))
            .expect("root");
        assert_eq!(root.status, ConversationStatus::Completed);
        assert!(chapter.chapter_summary_page_id.is_some());
    }
}

#[test]
fn stop_request_ends_idle_workers() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut store = bw_storage::SqliteStore::open(dir.path()).expect("open store");
    add_chapters(&mut store, 1);

    let mut config = config_for(&dir);
    config.workers = 1;
    // The root asks for feedback nobody gives, so the worker idles.
    let transport = ScriptedTransport::with_handler(|request| {
        reply(
            &[],
            vec![call(
                &format!("toolu_{}", request.generation),
                "RequestExpertFeedback",
                json!({ "request": "Who is the stranger at the inn?" }),
            )],
        )
    });
    let pool = WorkerPool::spawn(&config, transport.clone(), ManualClock::new());
    while transport.requests().is_empty() {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    pool.request_stop();
    let summaries = pool.join().expect("workers");

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].committed_turns, 1);
    assert_eq!(transport.requests().len(), 1);
}

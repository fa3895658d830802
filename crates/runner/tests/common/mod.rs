#![forbid(unsafe_code)]
#![allow(dead_code)]

use bw_runner::{
    Advance, Clock, EngineConfig, LlmTransport, Orchestrator, Scheduler, ToolInvocation,
    TransportError, TurnOutcome, TurnRequest, TurnResponse,
};
use bw_storage::{AddChapterRequest, ClaimRequest, SqliteStore};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const START_MS: i64 = 1_700_000_000_000;

type Scripted = Result<TurnResponse, TransportError>;
type Handler = dyn Fn(&TurnRequest) -> Scripted + Send + Sync;

/// Replies from per-conversation queues, then from a shared queue, then from
/// an optional handler. With nothing left the call fails fatally.
#[derive(Default)]
pub struct ScriptedTransport {
    by_conversation: Mutex<HashMap<i64, VecDeque<Scripted>>>,
    shared: Mutex<VecDeque<Scripted>>,
    handler: Option<Box<Handler>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_handler(handler: impl Fn(&TurnRequest) -> Scripted + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Some(Box::new(handler)),
            ..Self::default()
        })
    }

    pub fn push(&self, conversation_id: i64, reply: Scripted) {
        self.by_conversation
            .lock()
            .expect("script lock")
            .entry(conversation_id)
            .or_default()
            .push_back(reply);
    }

    pub fn push_next(&self, reply: Scripted) {
        self.shared.lock().expect("script lock").push_back(reply);
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().expect("request lock").clone()
    }

    pub fn requests_for(&self, conversation_id: i64) -> Vec<TurnRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.conversation_id == conversation_id)
            .collect()
    }
}

impl LlmTransport for ScriptedTransport {
    fn send(&self, request: &TurnRequest) -> Result<TurnResponse, TransportError> {
        self.requests.lock().expect("request lock").push(request.clone());
        let own = self
            .by_conversation
            .lock()
            .expect("script lock")
            .get_mut(&request.conversation_id)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = own {
            return reply;
        }
        if let Some(reply) = self.shared.lock().expect("script lock").pop_front() {
            return reply;
        }
        match &self.handler {
            Some(handler) => handler(request),
            None => Err(TransportError::Fatal(format!(
                "no scripted reply for conversation {}",
                request.conversation_id
            ))),
        }
    }
}

#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(START_MS)))
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: SqliteStore,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Scheduler,
}

pub fn config_for(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        storage_dir: dir.path().to_path_buf(),
        poll_ms: 10,
        ..EngineConfig::default()
    }
}

pub fn harness(tune: impl FnOnce(&mut EngineConfig)) -> Harness {
    harness_with(ScriptedTransport::new(), tune)
}

pub fn harness_with(transport: Arc<ScriptedTransport>, tune: impl FnOnce(&mut EngineConfig)) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = SqliteStore::open(dir.path()).expect("open store");
    let mut config = config_for(&dir);
    tune(&mut config);
    let clock = ManualClock::new();
    let orchestrator = Orchestrator::new(config, transport.clone(), clock.clone());
    Harness {
        dir,
        store,
        transport,
        clock,
        scheduler: Scheduler::new(orchestrator, "test-worker"),
    }
}

pub fn add_chapters(store: &mut SqliteStore, count: i64) {
    for id in 0..count {
        store
            .add_chapter(AddChapterRequest {
                id,
                name: vec!["Book One".to_string(), format!("Chapter {}", id + 1)],
                text: format!("Text of chapter {}.", id + 1),
            })
            .expect("add chapter");
    }
}

/// Starts the first unstarted chapter and returns its root conversation.
pub fn start_next_chapter(h: &mut Harness) -> i64 {
    match h.scheduler.advance_chapter(&mut h.store).expect("advance") {
        Advance::Started { conversation_id, .. } => conversation_id,
        other => panic!("expected a chapter to start, got {other:?}"),
    }
}

/// Claims the next sendable conversation and runs exactly one turn of it.
pub fn run_one_turn(h: &mut Harness) -> TurnOutcome {
    let request = ClaimRequest {
        worker_id: h.scheduler.worker_id().to_string(),
        lease_ttl_ms: 60_000,
        now_ms: h.clock.now_ms(),
    };
    let claim = h
        .store
        .claim_next(&request)
        .expect("claim")
        .expect("a sendable conversation");
    h.scheduler
        .orchestrator()
        .run_turn(&mut h.store, &claim)
        .expect("turn")
}

pub fn call(use_id: &str, name: &str, params: Value) -> ToolInvocation {
    ToolInvocation {
        use_id: use_id.to_string(),
        name: name.to_string(),
        params,
    }
}

pub fn reply(texts: &[&str], tool_calls: Vec<ToolInvocation>) -> Scripted {
    Ok(TurnResponse {
        texts: texts.iter().map(|text| text.to_string()).collect(),
        tool_calls,
        input_tokens: 10,
        output_tokens: 5,
        previously: None,
    })
}

pub fn summary_page_call(use_id: &str) -> ToolInvocation {
    call(
        use_id,
        "WriteWikiPage",
        serde_json::json!({
            "slug": "chapter-summary",
            "create": true,
            "title": "Chapter summary",
            "names": ["Chapter summary"],
            "summary": "What happened.",
            "body": "Events of the chapter."
        }),
    )
}

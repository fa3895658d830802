#![forbid(unsafe_code)]

mod common;

use bw_core::WaitingOn;
use bw_storage::{AddChapterRequest, ClaimRequest, SqliteStore, StoreError};
use common::{add_chapters, open_store};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};

const NOW: i64 = 1_700_000_000_000;
const TTL: u64 = 60_000;

fn request(worker: &str, now_ms: i64) -> ClaimRequest {
    ClaimRequest {
        worker_id: worker.to_string(),
        lease_ttl_ms: TTL,
        now_ms,
    }
}

fn start(store: &mut SqliteStore, chapter: i64) -> i64 {
    store
        .start_chapter_conversation(chapter, "Process the chapter.")
        .expect("start chapter")
        .id
}

#[test]
fn claimed_conversation_is_not_handed_out_twice() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 1);
    let root = start(&mut fx.store, 0);

    let claim = fx
        .store
        .claim_next(&request("w1", NOW))
        .expect("claim")
        .expect("runnable conversation");
    assert_eq!(claim.conversation_id, root);
    assert_eq!(claim.expires_at_ms, NOW + 60_000);
    assert!(fx.store.claim_next(&request("w2", NOW + 1)).expect("claim").is_none());

    fx.store.release_claim(&claim).expect("release");
    let again = fx
        .store
        .claim_next(&request("w2", NOW + 2))
        .expect("claim")
        .expect("released conversation");
    assert_eq!(again.worker_id, "w2");
    assert!(again.revision > claim.revision);
}

#[test]
fn expired_lease_can_be_taken_over() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 1);
    start(&mut fx.store, 0);

    let stale = fx
        .store
        .claim_next(&request("w1", NOW))
        .expect("claim")
        .expect("conversation");
    let fresh = fx
        .store
        .claim_next(&request("w2", NOW + 60_000))
        .expect("claim")
        .expect("expired lease");
    assert_eq!(fresh.conversation_id, stale.conversation_id);

    let err = fx.store.release_claim(&stale).expect_err("stale claim");
    assert!(matches!(err, StoreError::ClaimMismatch { .. }), "{err:?}");
    fx.store.release_claim(&fresh).expect("release fresh");
}

#[test]
fn interrupted_llm_turn_is_recovered_after_the_lease() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 1);
    let root = start(&mut fx.store, 0);

    let claim = fx
        .store
        .claim_next(&request("w1", NOW))
        .expect("claim")
        .expect("conversation");
    let waiting = fx.store.set_llm_wait(&claim, NOW).expect("llm wait");
    assert_eq!(waiting, WaitingOn::llm_turn(root, 0));

    assert!(fx.store.recover_interrupted_turns(NOW + 1_000).expect("recover").is_empty());
    assert!(fx.store.claim_next(&request("w2", NOW + 1_000)).expect("claim").is_none());

    let recovered = fx
        .store
        .recover_interrupted_turns(NOW + 60_000)
        .expect("recover");
    assert_eq!(recovered, vec![root]);
    let row = fx.store.view().conversation(root).expect("load").expect("exists");
    assert_eq!(row.waiting_on, None);
    assert_eq!(row.claimed_by, None);

    let err = fx.store.release_claim(&claim).expect_err("recovered claim");
    assert!(matches!(err, StoreError::ClaimMismatch { .. }), "{err:?}");
    assert!(fx.store.claim_next(&request("w2", NOW + 60_001)).expect("claim").is_some());
}

#[test]
fn transport_failure_defers_the_next_attempt() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 1);
    let root = start(&mut fx.store, 0);

    let claim = fx
        .store
        .claim_next(&request("w1", NOW))
        .expect("claim")
        .expect("conversation");
    fx.store.set_llm_wait(&claim, NOW).expect("llm wait");
    let attempts = fx
        .store
        .record_transport_failure(&claim, NOW + 2_000)
        .expect("record failure");
    assert_eq!(attempts, 1);

    let row = fx.store.view().conversation(root).expect("load").expect("exists");
    assert_eq!(row.waiting_on, None);
    assert_eq!(row.transport_attempts, 1);
    assert!(fx.store.claim_next(&request("w1", NOW + 1_999)).expect("claim").is_none());
    assert!(fx.store.claim_next(&request("w1", NOW + 2_000)).expect("claim").is_some());
}

#[test]
fn finished_conversation_counts_as_released() {
    let mut fx = open_store();
    add_chapters(&mut fx.store, 1);
    let root = start(&mut fx.store, 0);

    let claim = fx
        .store
        .claim_next(&request("w1", NOW))
        .expect("claim")
        .expect("conversation");
    fx.store.complete(root, "done", NOW).expect("complete");
    fx.store.release_claim(&claim).expect("release after completion");
    assert!(fx.store.claim_next(&request("w1", NOW)).expect("claim").is_none());
}

#[test]
fn empty_worker_id_is_rejected() {
    let mut fx = open_store();
    let err = fx.store.claim_next(&request("  ", NOW)).expect_err("empty worker");
    assert!(matches!(err, StoreError::InvalidInput(_)), "{err:?}");
}

#[test]
fn concurrent_workers_claim_disjoint_conversations() {
    const CONVERSATIONS: i64 = 8;
    const WORKERS: usize = 4;

    let fx = open_store();
    let dir = fx.dir.path().to_path_buf();
    {
        let mut store = fx.store;
        for id in 0..CONVERSATIONS {
            store
                .add_chapter(AddChapterRequest {
                    id,
                    name: vec![format!("Part {id}")],
                    text: String::new(),
                })
                .expect("add chapter");
            start(&mut store, id);
        }
    }

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let dir = dir.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let mut store = SqliteStore::open(&dir).expect("open store");
                barrier.wait();
                let mut claimed = Vec::new();
                while let Some(claim) = store
                    .claim_next(&request(&format!("w{worker}"), NOW))
                    .expect("claim")
                {
                    claimed.push(claim.conversation_id);
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().expect("worker thread"));
    }
    let unique: BTreeSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), unique.len(), "a conversation was claimed twice: {all:?}");
    assert_eq!(unique.len(), CONVERSATIONS as usize);
}

#![forbid(unsafe_code)]

use crate::error::EngineError;
use crate::orchestrator::{Orchestrator, TurnOutcome};
use bw_core::ConversationStatus;
use bw_storage::{ClaimRequest, ConfigKey, SqliteStore, StoreError};
use tracing::{debug, info, warn};

/// What chapter advancement found at the end of a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    /// Some conversation is still active.
    Busy,
    Started { chapter: i64, conversation_id: i64 },
    /// The latest chapter's root conversation failed; nothing starts until
    /// an operator intervenes.
    Halted { chapter: i64, conversation_id: i64 },
    /// Every chapter has been processed.
    Finished,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassReport {
    pub recovered: Vec<i64>,
    pub expired: Vec<i64>,
    pub turns: Vec<TurnOutcome>,
    pub advance: Advance,
}

impl PassReport {
    pub fn made_progress(&self) -> bool {
        !self.recovered.is_empty()
            || !self.expired.is_empty()
            || !self.turns.is_empty()
            || matches!(self.advance, Advance::Started { .. })
    }

    /// No further pass can do anything without outside input.
    pub fn is_terminal(&self) -> bool {
        matches!(self.advance, Advance::Finished | Advance::Halted { .. })
    }
}

pub struct Scheduler {
    orchestrator: Orchestrator,
    worker_id: String,
}

impl Scheduler {
    pub fn new(orchestrator: Orchestrator, worker_id: impl Into<String>) -> Self {
        Self {
            orchestrator,
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Sweeps stale waits, drains every sendable conversation, then starts
    /// the next chapter when the current one is done.
    pub fn run_pass(&self, store: &mut SqliteStore) -> Result<PassReport, EngineError> {
        let config = self.orchestrator.config();
        let now_ms = self.orchestrator.now_ms();
        let recovered = store.recover_interrupted_turns(now_ms)?;
        let expired = store.expire_waits(now_ms, config.wait_timeout_ms)?;
        if !expired.is_empty() {
            warn!(worker = %self.worker_id, conversations = ?expired, "waits timed out");
        }

        let mut turns = Vec::new();
        loop {
            let request = ClaimRequest {
                worker_id: self.worker_id.clone(),
                lease_ttl_ms: config.claim_ttl_ms,
                now_ms: self.orchestrator.now_ms(),
            };
            let Some(claim) = store.claim_next(&request)? else {
                break;
            };
            let outcome = self.orchestrator.run_turn(store, &claim)?;
            debug!(worker = %self.worker_id, outcome = ?outcome, "turn finished");
            turns.push(outcome);
        }

        let advance = self.advance_chapter(store)?;
        Ok(PassReport {
            recovered,
            expired,
            turns,
            advance,
        })
    }

    /// Runs passes until one makes no progress or `max_passes` is reached.
    pub fn run_until_idle(&self, store: &mut SqliteStore, max_passes: usize) -> Result<Vec<PassReport>, EngineError> {
        let mut reports = Vec::new();
        for _ in 0..max_passes {
            let report = self.run_pass(store)?;
            let progressed = report.made_progress();
            reports.push(report);
            if !progressed {
                break;
            }
        }
        Ok(reports)
    }

    pub fn advance_chapter(&self, store: &mut SqliteStore) -> Result<Advance, EngineError> {
        let advance = store.write("advance_chapter", |tx| -> Result<Advance, StoreError> {
            let view = tx.view();
            if view.has_active_conversations()? {
                return Ok(Advance::Busy);
            }
            if let Some(latest) = view.latest_started_chapter()? {
                if let Some(root_id) = latest.conversation_id {
                    let root = view.require_conversation(root_id)?;
                    if root.status == ConversationStatus::Failed {
                        return Ok(Advance::Halted {
                            chapter: latest.id,
                            conversation_id: root_id,
                        });
                    }
                }
            }
            let Some(next) = view.first_unstarted_chapter()? else {
                return Ok(Advance::Finished);
            };
            let prompt = view.config_value(ConfigKey::ChapterPrompt)?;
            let root = tx.start_chapter_conversation(next.id, &prompt)?;
            Ok(Advance::Started {
                chapter: next.id,
                conversation_id: root.id,
            })
        })?;

        match &advance {
            Advance::Started {
                chapter,
                conversation_id,
            } => info!(worker = %self.worker_id, chapter, conversation_id, "chapter advanced"),
            Advance::Halted {
                chapter,
                conversation_id,
            } => warn!(chapter, conversation_id, "chapter processing halted by failed root"),
            Advance::Busy | Advance::Finished => {}
        }
        Ok(advance)
    }
}

#![forbid(unsafe_code)]

//! One conversation turn: build the request under the claim, call the model
//! outside any transaction, then commit the response atomically.

mod commit;
mod request;

pub use commit::{FINISH_CHAPTER_HINT, SERIAL_TOOL_HINT};
pub use request::COMPRESSION_SYSTEM_PROMPT;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::transport::{Clock, LlmTransport, TransportError};
use bw_core::FailureReason;
use bw_storage::{ConversationClaim, SqliteStore, StoreError};
use commit::commit_turn;
use request::{PreparedTurn, prepare_turn};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Committed {
        conversation_id: i64,
        generation: i64,
        tool_calls: usize,
    },
    /// A retryable transport error pushed the next attempt back.
    Deferred {
        conversation_id: i64,
        attempts: i64,
        next_attempt_at_ms: i64,
    },
    Failed {
        conversation_id: i64,
        reason: FailureReason,
    },
    /// The lease was lost (expired and taken over, or the conversation
    /// finished elsewhere); nothing was written.
    Abandoned { conversation_id: i64 },
}

fn lost_claim(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::Store(StoreError::ClaimMismatch { .. } | StoreError::ConversationTerminal { .. })
    )
}

#[derive(Clone)]
pub struct Orchestrator {
    config: EngineConfig,
    transport: Arc<dyn LlmTransport>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    /// Out-of-range config values are clamped here, whatever built them.
    pub fn new(mut config: EngineConfig, transport: Arc<dyn LlmTransport>, clock: Arc<dyn Clock>) -> Self {
        config.clamp();
        Self {
            config,
            transport,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Runs one turn of the claimed conversation to completion.
    pub fn run_turn(&self, store: &mut SqliteStore, claim: &ConversationClaim) -> Result<TurnOutcome, EngineError> {
        let conversation_id = claim.conversation_id;
        let prepared = match store.write("prepare_turn", |tx| -> Result<PreparedTurn, EngineError> {
            Ok(prepare_turn(tx, &self.config, claim, self.clock.now_ms())?)
        }) {
            Ok(prepared) => prepared,
            Err(err) if lost_claim(&err) => {
                warn!(conversation_id, error = %err, "claim lost before sending");
                return Ok(TurnOutcome::Abandoned { conversation_id });
            }
            Err(err) => return Err(err),
        };

        let response = match self.transport.send(&prepared.request) {
            Ok(response) => response,
            Err(err) => return self.transport_failed(store, claim, &prepared, err),
        };

        let compressing = prepared.request.compressing;
        match store.write("commit_turn", |tx| {
            commit_turn(tx, &self.config, claim, &response, compressing, self.clock.now_ms())
        }) {
            Ok(outcome) => Ok(outcome),
            Err(err) if lost_claim(&err) => {
                warn!(
                    conversation_id,
                    generation = prepared.request.generation,
                    error = %err,
                    "claim lost before commit; response dropped"
                );
                Ok(TurnOutcome::Abandoned { conversation_id })
            }
            Err(err) => {
                error!(
                    conversation_id,
                    generation = prepared.request.generation,
                    code = err.code(),
                    error = %err,
                    "turn commit failed"
                );
                Err(err)
            }
        }
    }

    fn transport_failed(
        &self,
        store: &mut SqliteStore,
        claim: &ConversationClaim,
        prepared: &PreparedTurn,
        err: TransportError,
    ) -> Result<TurnOutcome, EngineError> {
        let conversation_id = claim.conversation_id;
        let generation = prepared.request.generation;
        let now_ms = self.clock.now_ms();
        let attempts = prepared.transport_attempts + 1;

        let failure = match &err {
            TransportError::Fatal(detail) => Some((FailureReason::TransportFatal, detail.clone())),
            TransportError::Retryable(detail) if attempts >= self.config.max_transport_attempts => Some((
                FailureReason::TransportExhausted,
                format!("{attempts} attempts, last error: {detail}"),
            )),
            TransportError::Retryable(_) => None,
        };

        let result = match failure {
            Some((reason, detail)) => {
                error!(conversation_id, generation, attempts, reason = %reason, error = %err, "llm call failed");
                store
                    .write("transport_failed", |tx| -> Result<(), EngineError> {
                        tx.verify_claim(claim)?;
                        tx.fail(conversation_id, reason, &detail, now_ms)?;
                        Ok(())
                    })
                    .map(|()| TurnOutcome::Failed {
                        conversation_id,
                        reason,
                    })
            }
            None => {
                let next_attempt_at_ms = now_ms.saturating_add(self.config.backoff_ms(attempts));
                warn!(conversation_id, generation, attempts, next_attempt_at_ms, error = %err, "llm call will be retried");
                store
                    .write("transport_retry", |tx| -> Result<i64, EngineError> {
                        Ok(tx.record_transport_failure(claim, next_attempt_at_ms)?)
                    })
                    .map(|attempts| TurnOutcome::Deferred {
                        conversation_id,
                        attempts,
                        next_attempt_at_ms,
                    })
            }
        };
        match result {
            Err(err) if lost_claim(&err) => Ok(TurnOutcome::Abandoned { conversation_id }),
            other => other,
        }
    }
}

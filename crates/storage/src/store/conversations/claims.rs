#![forbid(unsafe_code)]

use crate::store::{
    ClaimRequest, ConversationClaim, ConversationRow, SqliteStore, StoreError, WriteTx,
};
use bw_core::WaitingOn;
use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

const SENDABLE_SQL: &str = "SELECT c.id, c.revision FROM conversation c \
     WHERE c.status='ACTIVE' AND c.waiting_on_id IS NULL \
       AND c.next_attempt_at_ms <= ?1 \
       AND (c.claimed_by IS NULL OR c.claim_expires_at_ms IS NULL OR c.claim_expires_at_ms <= ?1) \
       AND EXISTS (SELECT 1 FROM block b WHERE b.conversation=c.id AND b.sent=0) \
       AND NOT EXISTS (SELECT 1 FROM block b WHERE b.conversation=c.id \
           AND b.tool_name IS NOT NULL AND b.tool_response IS NULL AND b.errored=0) \
     ORDER BY c.next_attempt_at_ms ASC, c.id ASC \
     LIMIT 1";

impl WriteTx<'_> {
    /// Leases the next conversation whose turn can be sent, if any.
    pub fn claim_next(&self, request: &ClaimRequest) -> Result<Option<ConversationClaim>, StoreError> {
        let worker_id = request.worker_id.trim();
        if worker_id.is_empty() {
            return Err(StoreError::InvalidInput("worker_id must not be empty"));
        }
        if request.lease_ttl_ms == 0 {
            return Err(StoreError::InvalidInput("lease_ttl_ms must be > 0"));
        }
        let now_ms = request.now_ms;
        let expires_at_ms = now_ms.saturating_add(i64::try_from(request.lease_ttl_ms).unwrap_or(i64::MAX));

        let Some((conversation_id, revision)) = self
            .conn()
            .query_row(SENDABLE_SQL, params![now_ms], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })
            .optional()?
        else {
            return Ok(None);
        };

        let changed = self.conn().execute(
            "UPDATE conversation SET claimed_by=?3, claim_expires_at_ms=?4, revision=?2 + 1 \
             WHERE id=?1 AND revision=?2",
            params![conversation_id, revision, worker_id, expires_at_ms],
        )?;
        if changed != 1 {
            return Err(StoreError::ClaimMismatch { conversation_id });
        }
        debug!(conversation_id, worker = worker_id, expires_at_ms, "conversation claimed");
        Ok(Some(ConversationClaim {
            conversation_id,
            worker_id: worker_id.to_string(),
            revision: revision + 1,
            expires_at_ms,
        }))
    }

    /// Returns the conversation when `claim` still holds its lease.
    pub fn verify_claim(&self, claim: &ConversationClaim) -> Result<ConversationRow, StoreError> {
        let conversation = self.view().require_conversation(claim.conversation_id)?;
        if conversation.status.is_terminal() {
            return Err(StoreError::ConversationTerminal {
                conversation_id: conversation.id,
                status: conversation.status.as_str(),
            });
        }
        if conversation.claimed_by.as_deref() != Some(claim.worker_id.as_str())
            || conversation.revision != claim.revision
        {
            return Err(StoreError::ClaimMismatch {
                conversation_id: claim.conversation_id,
            });
        }
        Ok(conversation)
    }

    /// Drops the lease. A conversation that finished during the turn has
    /// already shed its claim, which counts as released.
    pub fn release_claim(&self, claim: &ConversationClaim) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE conversation SET claimed_by=NULL, claim_expires_at_ms=NULL, revision=revision+1 \
             WHERE id=?1 AND claimed_by=?2 AND revision=?3",
            params![claim.conversation_id, claim.worker_id, claim.revision],
        )?;
        if changed == 1 {
            return Ok(());
        }
        let conversation = self.view().require_conversation(claim.conversation_id)?;
        if conversation.status.is_terminal() && conversation.claimed_by.is_none() {
            return Ok(());
        }
        Err(StoreError::ClaimMismatch {
            conversation_id: claim.conversation_id,
        })
    }

    /// Marks the claimed conversation as waiting on its in-flight LLM call.
    pub fn set_llm_wait(&self, claim: &ConversationClaim, now_ms: i64) -> Result<WaitingOn, StoreError> {
        let conversation = self.verify_claim(claim)?;
        let waiting = WaitingOn::llm_turn(conversation.id, conversation.current_generation);
        if !self.block_if_idle(conversation.id, &waiting, now_ms)? {
            return Err(StoreError::ClaimMismatch {
                conversation_id: conversation.id,
            });
        }
        Ok(waiting)
    }

    /// Records a retryable transport failure: the LLM wait and the lease are
    /// dropped and the next attempt is deferred to `next_attempt_at_ms`.
    /// Returns the number of consecutive failed attempts.
    pub fn record_transport_failure(
        &self,
        claim: &ConversationClaim,
        next_attempt_at_ms: i64,
    ) -> Result<i64, StoreError> {
        let conversation = self.verify_claim(claim)?;
        self.conn().execute(
            "UPDATE conversation SET transport_attempts = transport_attempts + 1, \
               next_attempt_at_ms=?2, waiting_on_id=NULL, waiting_since=NULL, \
               claimed_by=NULL, claim_expires_at_ms=NULL, revision=revision+1 \
             WHERE id=?1",
            params![conversation.id, next_attempt_at_ms],
        )?;
        let attempts = conversation.transport_attempts + 1;
        info!(
            conversation_id = conversation.id,
            generation = conversation.current_generation,
            attempts,
            next_attempt_at_ms,
            "llm call deferred"
        );
        Ok(attempts)
    }

    pub fn reset_transport_attempts(&self, conversation_id: i64) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE conversation SET transport_attempts=0, next_attempt_at_ms=0 WHERE id=?1",
            params![conversation_id],
        )?;
        Ok(())
    }
}

impl SqliteStore {
    pub fn claim_next(&mut self, request: &ClaimRequest) -> Result<Option<ConversationClaim>, StoreError> {
        self.write("claim_next", |tx| tx.claim_next(request))
    }

    pub fn release_claim(&mut self, claim: &ConversationClaim) -> Result<(), StoreError> {
        self.write("release_claim", |tx| tx.release_claim(claim))
    }

    pub fn set_llm_wait(&mut self, claim: &ConversationClaim, now_ms: i64) -> Result<WaitingOn, StoreError> {
        self.write("set_llm_wait", |tx| tx.set_llm_wait(claim, now_ms))
    }

    pub fn record_transport_failure(
        &mut self,
        claim: &ConversationClaim,
        next_attempt_at_ms: i64,
    ) -> Result<i64, StoreError> {
        self.write("record_transport_failure", |tx| {
            tx.record_transport_failure(claim, next_attempt_at_ms)
        })
    }
}

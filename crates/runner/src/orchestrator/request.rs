#![forbid(unsafe_code)]

use crate::config::EngineConfig;
use crate::tools::tool_descriptors;
use crate::transport::{TurnMessage, TurnRequest};
use bw_core::TextRole;
use bw_storage::{BlockBody, BlockRow, ConfigKey, ConversationClaim, NewBlock, StoreError, WriteTx};
use serde_json::Value;
use tracing::{debug, info};

pub const COMPRESSION_SYSTEM_PROMPT: &str = "You are an intelligent agent helping another agent.";

/// A request ready to send, with what the commit step needs to know about
/// the conversation as it was when the request was built.
#[derive(Clone, Debug)]
pub(crate) struct PreparedTurn {
    pub request: TurnRequest,
    pub transport_attempts: i64,
}

pub(crate) fn render_blocks(blocks: &[BlockRow]) -> Result<Vec<TurnMessage>, StoreError> {
    let mut messages = Vec::with_capacity(blocks.len());
    for block in blocks {
        match &block.body {
            BlockBody::Text {
                role: TextRole::User,
                body,
            } => messages.push(TurnMessage::User { text: body.clone() }),
            BlockBody::Text {
                role: TextRole::Assistant,
                body,
            } => messages.push(TurnMessage::Assistant { text: body.clone() }),
            BlockBody::ToolUse {
                name,
                use_id,
                params,
                response,
                errored,
            } => {
                let params: Value = serde_json::from_str(params)?;
                messages.push(TurnMessage::ToolUse {
                    use_id: use_id.clone(),
                    name: name.clone(),
                    params,
                });
                messages.push(TurnMessage::ToolResult {
                    use_id: use_id.clone(),
                    content: response.clone().unwrap_or_default(),
                    is_error: *errored,
                });
            }
        }
    }
    Ok(messages)
}

fn is_pending_compress_prompt(blocks: &[BlockRow], compress_prompt: &str) -> bool {
    matches!(
        blocks.last().map(|block| &block.body),
        Some(BlockBody::Text { role: TextRole::User, body }) if body == compress_prompt
    )
}

/// Builds the next request of a claimed conversation and parks it on the
/// LLM wait for its current generation.
pub(crate) fn prepare_turn(
    tx: &WriteTx<'_>,
    config: &EngineConfig,
    claim: &ConversationClaim,
    now_ms: i64,
) -> Result<PreparedTurn, StoreError> {
    let conversation = tx.verify_claim(claim)?;
    let view = tx.view();

    let compressing =
        conversation.previously.is_some() && conversation.current_tokens > config.compression_threshold;
    let system_prompt = if compressing {
        let compress_prompt = view.config_value(ConfigKey::CompressPrompt)?;
        if !is_pending_compress_prompt(&view.unsent_blocks(conversation.id)?, &compress_prompt) {
            tx.append(conversation.id, NewBlock::user(compress_prompt))?;
        }
        info!(
            conversation_id = conversation.id,
            current_tokens = conversation.current_tokens,
            "compressing conversation"
        );
        COMPRESSION_SYSTEM_PROMPT.to_string()
    } else {
        view.config_value(ConfigKey::SystemPrompt)?
    };

    let blocks = view.unsent_blocks(conversation.id)?;
    let messages = render_blocks(&blocks)?;
    tx.set_llm_wait(claim, now_ms)?;
    debug!(
        conversation_id = conversation.id,
        generation = conversation.current_generation,
        unsent = blocks.len(),
        previously = ?conversation.previously,
        "turn prepared"
    );

    Ok(PreparedTurn {
        request: TurnRequest {
            conversation_id: conversation.id,
            generation: conversation.current_generation,
            previously: conversation.previously,
            system_prompt,
            messages,
            tools: tool_descriptors(),
            compressing,
        },
        transport_attempts: conversation.transport_attempts,
    })
}

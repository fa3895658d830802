#![forbid(unsafe_code)]

use super::{ToolContext, ToolError};
use bw_core::template::PromptTemplate;
use bw_storage::{CreatePromptRequest, PromptRow, WriteTx};
use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListPrompts {}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShowPrompt {
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WritePrompt {
    pub key: String,
    pub summary: String,
    pub template: String,
}

fn variables_line(prompt: &PromptRow) -> String {
    let variables: Vec<String> = PromptTemplate::parse(prompt.template.as_str())
        .map(|template| template.identifiers().into_iter().collect())
        .unwrap_or_default();
    if variables.is_empty() {
        "Variables: none".to_string()
    } else {
        format!("Variables: {}", variables.join(", "))
    }
}

impl ListPrompts {
    pub(super) fn apply(&self, tx: &WriteTx<'_>) -> Result<String, ToolError> {
        let prompts = tx.view().active_prompts()?;
        if prompts.is_empty() {
            return Ok("There are no stored prompts.".to_string());
        }
        let entries: Vec<String> = prompts
            .values()
            .map(|prompt| {
                format!(
                    "Key: {}\nSummary: {}\n{}\n",
                    prompt.key,
                    prompt.summary,
                    variables_line(prompt)
                )
            })
            .collect();
        Ok(entries.join("\n"))
    }
}

impl ShowPrompt {
    pub(super) fn apply(&self, tx: &WriteTx<'_>) -> Result<String, ToolError> {
        let Some(prompt) = tx.view().get_prompt(&self.key)? else {
            return Err(ToolError::rejected(format!("Key {} does not exist.", self.key)));
        };
        Ok(format!(
            "Summary: {}\n{}\nTemplate: {}",
            prompt.summary,
            variables_line(&prompt),
            prompt.template
        ))
    }
}

impl WritePrompt {
    pub(super) fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<String, ToolError> {
        if !PromptTemplate::is_valid(&self.template) {
            return Err(ToolError::rejected("Template is not valid, prompt rejected."));
        }
        tx.create_prompt(CreatePromptRequest {
            key: self.key.clone(),
            create_block: Some(ctx.block_id),
            summary: self.summary.clone(),
            template: self.template.clone(),
        })?;
        Ok("Prompt stored".to_string())
    }
}

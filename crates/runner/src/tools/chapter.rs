#![forbid(unsafe_code)]

use super::{ToolContext, ToolError};
use bw_storage::WriteTx;
use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadChapter {
    #[serde(default)]
    pub chapter_offset: Option<i64>,
}

impl ReadChapter {
    pub(super) fn apply(&self, tx: &WriteTx<'_>, ctx: ToolContext<'_>) -> Result<String, ToolError> {
        let offset = self.chapter_offset.unwrap_or(0);
        if offset > 0 {
            return Err(ToolError::rejected(
                "Cannot read future chapters (chapter_offset must be 0 or negative)",
            ));
        }
        let steps = u32::try_from(offset.unsigned_abs()).unwrap_or(u32::MAX);
        let Some(chapter) = tx.view().chapter_before(ctx.conversation.chapter, steps)? else {
            return Err(ToolError::rejected(format!(
                "There is no chapter {steps} chapter(s) before the current one"
            )));
        };
        if !chapter.is_started() {
            return Err(ToolError::rejected(format!(
                "Chapter {} has not been started yet",
                chapter.id
            )));
        }
        Ok(format!("**{}**\n\n{}", chapter.display_name(), chapter.text))
    }
}

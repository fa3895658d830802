#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError, StoreView, WriteTx};
use rusqlite::{OptionalExtension, params};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You maintain a spoiler-free wiki about a novel, one chapter at a time. \
Use ReadChapter to read the text, SearchWikiByName and ReadWikiPage to find what is already written, \
and WriteWikiPage to create or update pages about characters, places, objects and events. \
Only record what the text has revealed so far. Link related pages with [display text](slug). \
Delegate focused work with WritePrompt and SpawnAgent, and ask for help with RequestExpertFeedback \
when a decision could cause trouble in later chapters.";

pub const DEFAULT_CHAPTER_PROMPT: &str = "A new chapter has started. Read it with ReadChapter, \
update the wiki to reflect everything it reveals, write a page with the slug 'chapter-summary' \
summarising the chapter, and then call FinishChapter.";

pub const DEFAULT_COMPRESS_PROMPT: &str = "The conversation is getting long. Summarise everything \
you have learned and done so far, including outstanding work and any slugs you were about to touch, \
so that you can continue from the summary alone.";

/// Well-known rows of the `configuration` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigKey {
    SystemPrompt,
    ChapterPrompt,
    CompressPrompt,
}

impl ConfigKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemPrompt => "system_prompt",
            Self::ChapterPrompt => "chapter_prompt",
            Self::CompressPrompt => "compress_prompt",
        }
    }

    pub fn default_value(self) -> &'static str {
        match self {
            Self::SystemPrompt => DEFAULT_SYSTEM_PROMPT,
            Self::ChapterPrompt => DEFAULT_CHAPTER_PROMPT,
            Self::CompressPrompt => DEFAULT_COMPRESS_PROMPT,
        }
    }
}

impl StoreView<'_> {
    pub fn get_config_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM configuration WHERE key=?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Stored value for a well-known key, or its built-in default.
    pub fn config_value(&self, key: ConfigKey) -> Result<String, StoreError> {
        Ok(self
            .get_config_value(key.as_str())?
            .unwrap_or_else(|| key.default_value().to_string()))
    }
}

impl WriteTx<'_> {
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if key.trim().is_empty() {
            return Err(StoreError::InvalidInput("config key must not be empty"));
        }
        self.conn().execute(
            "INSERT INTO configuration(key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

impl SqliteStore {
    pub fn set_config_value(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write("set_config_value", |tx| tx.set_config_value(key, value))
    }
}

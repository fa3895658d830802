#![forbid(unsafe_code)]

mod common;

use bw_storage::{ConfigKey, CreatePromptRequest, DEFAULT_SYSTEM_PROMPT, SqliteStore, StoreError};
use common::open_store;

fn prompt(key: &str, template: &str) -> CreatePromptRequest {
    CreatePromptRequest {
        key: key.to_string(),
        create_block: None,
        summary: format!("{key} prompt"),
        template: template.to_string(),
    }
}

#[test]
fn newest_prompt_version_is_active() {
    let mut fx = open_store();
    fx.store
        .create_prompt(prompt("character", "Write about $name."))
        .expect("v1");
    let v2 = fx
        .store
        .create_prompt(prompt("character", "Write a page about $name in $chapter."))
        .expect("v2");
    fx.store
        .create_prompt(prompt("place", "Describe $place."))
        .expect("place");

    let view = fx.store.view();
    let active = view.active_prompts().expect("active");
    assert_eq!(active.keys().cloned().collect::<Vec<_>>(), vec!["character", "place"]);
    assert_eq!(active["character"].template, v2.template);
    assert_eq!(view.prompt_history("character").expect("history").len(), 2);

    let err = view.require_prompt("missing").expect_err("unknown key");
    assert!(matches!(err, StoreError::PromptNotFound(key) if key == "missing"));
}

#[test]
fn malformed_prompts_are_rejected() {
    let mut fx = open_store();
    let err = fx
        .store
        .create_prompt(prompt("bad", "Broken ${name"))
        .expect_err("bad placeholder");
    assert!(matches!(err, StoreError::InvalidInput(_)), "{err:?}");

    let err = fx
        .store
        .create_prompt(CreatePromptRequest {
            summary: "   ".to_string(),
            ..prompt("blank", "Hello")
        })
        .expect_err("blank summary");
    assert!(matches!(err, StoreError::InvalidInput(_)), "{err:?}");
}

#[test]
fn config_values_fall_back_to_defaults_and_persist() {
    let mut fx = open_store();
    assert_eq!(
        fx.store.view().config_value(ConfigKey::SystemPrompt).expect("default"),
        DEFAULT_SYSTEM_PROMPT
    );

    fx.store
        .set_config_value(ConfigKey::SystemPrompt.as_str(), "Be brief.")
        .expect("set");
    drop(fx.store);

    let reopened = SqliteStore::open(fx.dir.path()).expect("reopen");
    assert_eq!(
        reopened.view().config_value(ConfigKey::SystemPrompt).expect("stored"),
        "Be brief."
    );
    assert_eq!(reopened.view().get_config_value("unknown").expect("lookup"), None);
}

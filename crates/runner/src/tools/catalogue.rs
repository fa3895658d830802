#![forbid(unsafe_code)]

use crate::transport::ToolDescriptor;
use serde_json::{Value, json};

pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    schema: fn() -> Value,
}

impl ToolSpec {
    pub fn input_schema(&self) -> Value {
        (self.schema)()
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name,
            description: self.description,
            input_schema: self.input_schema(),
        }
    }
}

pub const CATALOGUE: &[ToolSpec] = &[
    ToolSpec {
        name: "ReadChapter",
        description: "Read the text of the current chapter, or of an earlier one with a negative \
            chapter_offset. Future chapters cannot be read.",
        schema: read_chapter_schema,
    },
    ToolSpec {
        name: "ReadWikiPage",
        description: "Retrieve the full content of a wiki page: title, known names, summary and body.",
        schema: read_wiki_page_schema,
    },
    ToolSpec {
        name: "SearchWikiByName",
        description: "Find existing wiki pages for ONE entity by its names and aliases. Results \
            are ranked and paged, six per page.",
        schema: search_wiki_by_name_schema,
    },
    ToolSpec {
        name: "WriteWikiPage",
        description: "Create a page (create=true, all fields required) or update one (create=false, \
            only changed fields). Links use [display text](slug) and must point at existing pages. \
            Set delete_and_redirect_to to delete the page and repoint links to another slug, or to \
            an empty string to remove them.",
        schema: write_wiki_page_schema,
    },
    ToolSpec {
        name: "ListPrompts",
        description: "List the stored prompt templates available to SpawnAgent.",
        schema: empty_schema,
    },
    ToolSpec {
        name: "ShowPrompt",
        description: "Show one prompt template with its summary and variables.",
        schema: show_prompt_schema,
    },
    ToolSpec {
        name: "WritePrompt",
        description: "Store a self-contained prompt template using $variable placeholders. \
            Sub-agents see only the system prompt, the tools and this prompt.",
        schema: write_prompt_schema,
    },
    ToolSpec {
        name: "SpawnAgent",
        description: "Start a sub-agent from a stored prompt. template_names and template_values \
            must cover exactly the template's variables, without the '$' sign.",
        schema: spawn_agent_schema,
    },
    ToolSpec {
        name: "RequestExpertFeedback",
        description: "Ask a human expert for guidance when a decision could cause problems in \
            later chapters. The call stays open until the expert answers.",
        schema: request_feedback_schema,
    },
    ToolSpec {
        name: "CompleteTask",
        description: "Sub-agents only: finish the task and hand the result to the parent agent.",
        schema: complete_task_schema,
    },
    ToolSpec {
        name: "FinishChapter",
        description: "Chapter agent only: finish the chapter once the 'chapter-summary' page \
            has been written.",
        schema: empty_schema,
    },
];

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    CATALOGUE.iter().find(|spec| spec.name == name)
}

pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    CATALOGUE.iter().map(ToolSpec::descriptor).collect()
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn empty_schema() -> Value {
    object(json!({}), &[])
}

fn read_chapter_schema() -> Value {
    object(
        json!({
            "chapter_offset": {
                "type": "integer",
                "maximum": 0,
                "description": "0 or omitted reads the current chapter; -1 the previous one."
            }
        }),
        &[],
    )
}

fn read_wiki_page_schema() -> Value {
    object(
        json!({ "slug": { "type": "string", "description": "Lowercase, hyphenated page id." } }),
        &["slug"],
    )
}

fn search_wiki_by_name_schema() -> Value {
    object(
        json!({
            "names": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Names and aliases of a single entity."
            },
            "results_page": { "type": "integer", "minimum": 1 }
        }),
        &["names"],
    )
}

fn write_wiki_page_schema() -> Value {
    object(
        json!({
            "slug": { "type": "string" },
            "create": { "type": "boolean" },
            "title": { "type": "string" },
            "names": { "type": "array", "items": { "type": "string" } },
            "summary": { "type": "string", "description": "One or two plain-text sentences." },
            "body": { "type": "string", "description": "Markdown body." },
            "delete_and_redirect_to": { "type": "string" }
        }),
        &["slug", "create"],
    )
}

fn show_prompt_schema() -> Value {
    object(json!({ "key": { "type": "string" } }), &["key"])
}

fn write_prompt_schema() -> Value {
    object(
        json!({
            "key": { "type": "string" },
            "summary": { "type": "string" },
            "template": { "type": "string" }
        }),
        &["key", "summary", "template"],
    )
}

fn spawn_agent_schema() -> Value {
    object(
        json!({
            "prompt_key": { "type": "string" },
            "template_names": { "type": "array", "items": { "type": "string" } },
            "template_values": { "type": "array", "items": { "type": "string" } }
        }),
        &["prompt_key", "template_names", "template_values"],
    )
}

fn request_feedback_schema() -> Value {
    object(json!({ "request": { "type": "string" } }), &["request"])
}

fn complete_task_schema() -> Value {
    object(json!({ "result": { "type": "string" } }), &["result"])
}

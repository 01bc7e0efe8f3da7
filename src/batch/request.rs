//! Batch request envelope construction and size estimation.
//!
//! Every registered post becomes one newline-delimited JSON line in the
//! uploaded request file. The size estimator serialises the exact line the
//! submitter will write, so the accumulator's cap check holds across
//! workers.

use serde::Serialize;
use serde_json::Value;

use crate::models::Post;

/// System instruction for the analysis model.
pub const ANALYSIS_INSTRUCTION: &str = "You are a content-safety analyst reviewing webpages \
collected from search results. Determine whether the page promotes the sale of illegal drugs. \
For every promotion you find, quote the promotional content and list every messenger channel \
reference it contains (links such as t.me/..., @handles, or numeric channel ids). \
Return a strict JSON object with keys: drugs_related (boolean) and promotions (array of objects \
with keys 'content' and 'identifiers', where identifiers is an array of objects with key \
'identifier'). Do not include any text outside of the JSON.";

/// User-turn preface placed before the page content.
pub const ANALYSIS_PREFACE: &str = "Analyze the following webpage:";

/// Response schema enforced through the provider's structured output mode.
pub fn analysis_response_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "drugs_related": { "type": "boolean" },
            "promotions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "content": { "type": "string" },
                        "identifiers": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "identifier": { "type": "string" }
                                },
                                "required": ["identifier"]
                            }
                        }
                    },
                    "required": ["content", "identifiers"]
                }
            }
        },
        "required": ["drugs_related", "promotions"]
    })
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    role: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    response_mime_type: &'static str,
    response_json_schema: Value,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestLine<'a> {
    key: &'a str,
    request: RequestBody<'a>,
}

fn contents(prompt: &str) -> Vec<Content<'_>> {
    vec![
        Content {
            parts: vec![Part {
                text: ANALYSIS_INSTRUCTION,
            }],
            role: "user",
        },
        Content {
            parts: vec![Part {
                text: ANALYSIS_PREFACE,
            }],
            role: "user",
        },
        Content {
            parts: vec![Part { text: prompt }],
            role: "user",
        },
    ]
}

/// Serialise one request line (without the trailing newline).
pub fn request_line(key: &str, title: &str, text: &str) -> serde_json::Result<String> {
    let prompt = format!("Title: {}\n\nContent: {}", title, text);
    let line = RequestLine {
        key,
        request: RequestBody {
            contents: contents(&prompt),
            generation_config: GenerationConfig {
                temperature: 0.1,
                response_mime_type: "application/json",
                response_json_schema: analysis_response_schema(),
            },
        },
    };
    serde_json::to_string(&line)
}

/// Estimated byte size of the post's request line, newline included.
///
/// Deterministic for a given post, so every worker computes the same value.
pub fn estimate_request_size(post: &Post) -> u64 {
    let text = post.text.as_deref().unwrap_or_default();
    match request_line(&post.id, &post.title, text) {
        Ok(line) => line.len() as u64 + 1,
        // Serialization of plain strings cannot fail; be conservative if it
        // ever does.
        Err(_) => u64::MAX,
    }
}

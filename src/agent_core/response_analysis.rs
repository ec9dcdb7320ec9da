//! Response analysis for finalized model answers.
//!
//! Models are asked to answer with a JSON object `{title, body, tags}`. A
//! terminal answer that parses is stored as a structured message; anything
//! else is kept verbatim as plain content. Parse failures are never errors.

use serde::Deserialize;

use super::types::{Message, ResponseMeta, StructuredReply};

#[derive(Deserialize)]
struct ReplyShape {
    title: String,
    body: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// Try to read `text` as a `{title, body, tags}` object.
///
/// Accepts the object on its own or wrapped in a single markdown code fence.
pub fn parse_structured_reply(text: &str) -> Option<StructuredReply> {
    let candidate = strip_code_fence(text.trim());
    if !candidate.starts_with('{') {
        return None;
    }
    let shape: ReplyShape = serde_json::from_str(candidate).ok()?;
    Some(StructuredReply {
        title: shape.title,
        body: shape.body,
        tags: shape.tags,
    })
}

/// Build the message persisted for a terminal answer.
///
/// Usage, cost and latency travel in `meta` whichever way parsing goes.
pub fn finalize_answer(content: String, meta: ResponseMeta) -> Message {
    match parse_structured_reply(&content) {
        Some(reply) => Message::AssistantStructured {
            reply,
            raw: content,
            meta,
        },
        None => {
            tracing::debug!(model = %meta.model_id, "answer is not structured, keeping raw text");
            Message::AssistantPlain {
                content,
                meta: Some(meta),
            }
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return text;
    };
    // drop the info string (```json)
    match inner.split_once('\n') {
        Some((_, body)) => body.trim(),
        None => inner.trim(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::Usage;

    fn meta() -> ResponseMeta {
        ResponseMeta {
            model_id: "m".into(),
            model_name: "M".into(),
            temperature: 1.0,
            latency_ms: 42,
            usage: Usage::new(3, 4),
            cost: 0.5,
        }
    }

    #[test]
    fn test_structured_answer_parses() {
        let raw = r#"{"title":"T","body":"B","tags":["a","b"]}"#;
        match finalize_answer(raw.to_string(), meta()) {
            Message::AssistantStructured { reply, raw: kept, meta } => {
                assert_eq!(reply.title, "T");
                assert_eq!(reply.body, "B");
                assert_eq!(reply.tags, vec!["a", "b"]);
                assert_eq!(kept, raw);
                assert_eq!(meta.latency_ms, 42);
            }
            other => panic!("expected structured, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_json_falls_back_to_plain() {
        let raw = r#"{"title":"T","body":"B","tags":["a","b"]"#;
        match finalize_answer(raw.to_string(), meta()) {
            Message::AssistantPlain { content, meta } => {
                assert_eq!(content, raw);
                assert_eq!(meta.map(|m| m.usage.total_tokens), Some(7));
            }
            other => panic!("expected plain, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_prose_is_plain() {
        assert!(parse_structured_reply("Just an answer.").is_none());
        assert!(parse_structured_reply("").is_none());
    }

    #[test]
    fn test_missing_required_field_is_plain() {
        assert!(parse_structured_reply(r#"{"title":"only"}"#).is_none());
    }

    #[test]
    fn test_tags_default_to_empty() {
        let reply = parse_structured_reply(r#"{"title":"T","body":"B"}"#).unwrap();
        assert!(reply.tags.is_empty());
    }

    #[test]
    fn test_fenced_json_is_accepted() {
        let raw = "```json\n{\"title\":\"T\",\"body\":\"B\",\"tags\":[]}\n```";
        let reply = parse_structured_reply(raw).unwrap();
        assert_eq!(reply.title, "T");
    }
}

//! Model response parsing.
//!
//! The drafting contract is one JSON object: `{"entries": [...], "summary":
//! ...}`. Responses cut off at the token limit are repaired by salvaging the
//! complete prefix of the entries array.

use beanbot_core::{errors::Error, formatting::strip_code_fences, interpreter::DraftResponse, Result};
use serde_json::Value;

const TRUNCATED_SUMMARY: &str =
    "Response was truncated due to token limit. Please verify the generated entries.";

pub fn parse_draft_content(content: &str) -> Result<DraftResponse> {
    let content = strip_code_fences(content);
    if content.trim().is_empty() {
        return Err(Error::External("model response is empty".to_string()));
    }

    let parsed: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            if let Some(entries) = repair_truncated_entries(&content) {
                return Ok(DraftResponse {
                    entries,
                    summary: Some(TRUNCATED_SUMMARY.to_string()),
                });
            }
            let preview: String = content.chars().take(200).collect();
            return Err(Error::External(format!(
                "model response is not valid JSON: {e} | preview={preview:?}"
            )));
        }
    };

    let Some(obj) = parsed.as_object() else {
        return Err(Error::External(
            "model response is not a JSON object".to_string(),
        ));
    };
    let Some(entries) = obj.get("entries").and_then(Value::as_array) else {
        return Err(Error::External(
            "model response is missing the entries list".to_string(),
        ));
    };
    let entries = entries
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();

    let summary = match obj.get("summary") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    Ok(DraftResponse { entries, summary })
}

/// Salvage the entries array from a response cut off mid-object.
///
/// Bracket counting is deliberately naive; entry snippets do not contain
/// unbalanced brackets in practice.
fn repair_truncated_entries(content: &str) -> Option<Vec<String>> {
    if !content.starts_with("{\"") || content.ends_with('}') {
        return None;
    }
    let key_pos = content.find("\"entries\":")?;
    let after_key = &content[key_pos + "\"entries\":".len()..];

    let start = after_key.find('[')?;
    let mut depth = 0usize;
    let mut end = None;
    for (i, c) in after_key[start..].char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + i + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let entries_json = &after_key[start..end?];
    let entries: Vec<String> = serde_json::from_str(entries_json).ok()?;
    Some(entries)
}

/// Assistant text from a chat-completions response body.
pub fn extract_chat_content(body: &Value) -> Result<String> {
    let content = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .ok_or_else(|| Error::External("no choices in model response".to_string()))?;

    match content {
        Value::String(s) => Ok(s.clone()),
        // Some gateways return the content as a list of text parts.
        Value::Array(parts) => Ok(parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("")),
        Value::Null => Err(Error::External("model returned null content".to_string())),
        other => Err(Error::External(format!(
            "unexpected content type in model response: {other}"
        ))),
    }
}

/// Output text from a responses-API body (skipping reasoning blocks).
pub fn extract_responses_text(body: &Value) -> Result<String> {
    let outputs = body
        .get("output")
        .and_then(Value::as_array)
        .filter(|o| !o.is_empty())
        .ok_or_else(|| Error::External("no output in model response".to_string()))?;

    let message = outputs
        .iter()
        .find(|o| o.get("type").and_then(Value::as_str) == Some("message"))
        .or_else(|| outputs.first())
        .ok_or_else(|| Error::External("no message output in model response".to_string()))?;

    let mut pieces: Vec<&str> = Vec::new();
    if let Some(blocks) = message.get("content").and_then(Value::as_array) {
        for block in blocks {
            let kind = block.get("type").and_then(Value::as_str);
            if matches!(kind, Some("output_text") | Some("text")) {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    pieces.push(text);
                }
            }
        }
    }
    let text = pieces.concat().trim().to_string();
    if text.is_empty() {
        return Err(Error::External(
            "empty content in model response".to_string(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_response() {
        let resp =
            parse_draft_content(r#"{"entries": ["2024-01-10 * \"x\""], "summary": "ok"}"#).unwrap();
        assert_eq!(resp.entries, vec!["2024-01-10 * \"x\""]);
        assert_eq!(resp.summary.as_deref(), Some("ok"));
    }

    #[test]
    fn parses_fenced_response() {
        let resp =
            parse_draft_content("```json\n{\"entries\": [], \"summary\": null}\n```").unwrap();
        assert!(resp.entries.is_empty());
        assert!(resp.summary.is_none());
    }

    #[test]
    fn repairs_truncated_response() {
        let truncated = r#"{"entries": ["a", "b"], "summary": "this got cut o"#;
        let resp = parse_draft_content(truncated).unwrap();
        assert_eq!(resp.entries, vec!["a", "b"]);
        assert!(resp.summary.unwrap().contains("truncated"));
    }

    #[test]
    fn unrepairable_garbage_is_an_error() {
        let err = parse_draft_content("not json at all").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn missing_entries_is_an_error() {
        let err = parse_draft_content(r#"{"summary": "no entries key"}"#).unwrap_err();
        assert!(err.to_string().contains("entries"));
    }

    #[test]
    fn chat_content_from_string_and_parts() {
        let body = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_chat_content(&body).unwrap(), "hello");

        let body = json!({"choices": [{"message": {"content": [{"text": "a"}, {"text": "b"}]}}]});
        assert_eq!(extract_chat_content(&body).unwrap(), "ab");
    }

    #[test]
    fn responses_text_skips_reasoning_blocks() {
        let body = json!({"output": [
            {"type": "reasoning", "content": []},
            {"type": "message", "content": [{"type": "output_text", "text": "{\"a\":1}"}]}
        ]});
        assert_eq!(extract_responses_text(&body).unwrap(), "{\"a\":1}");
    }
}

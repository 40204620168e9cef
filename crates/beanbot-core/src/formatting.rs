//! Telegram HTML helpers: escaping, entry previews, message chunking.

use regex::Regex;

/// Telegram rejects messages longer than this.
pub const TELEGRAM_MAX_MESSAGE: usize = 4096;

/// Telegram truncates callback alerts around this length.
pub const CALLBACK_ALERT_MAX: usize = 200;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn pre_block(text: &str) -> String {
    format!("<pre>{}</pre>", escape_html(text))
}

fn code(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

/// Preview shown under the Accept/Reject keyboard: summary line plus the
/// drafted entries in a `<pre>` block.
pub fn draft_preview(summary: &str, entries: &[String]) -> String {
    let mut out = String::new();
    let summary = summary.trim();
    if !summary.is_empty() {
        out.push_str(&escape_html(summary));
        out.push_str("\n\n");
    }
    out.push_str(&pre_block(&entries.join("\n\n")));
    out
}

/// Preview shown when a drafted entry failed validation, above the
/// Auto-fix/Reject keyboard.
pub fn validation_failure_preview(error: &str, entries: &[String]) -> String {
    format!(
        "⚠️ The entry does not pass validation:\n{}\n\n{}",
        code(error),
        pre_block(&entries.join("\n\n"))
    )
}

/// Single line, at most `max_len` chars, for status rows and callback alerts.
pub fn truncate_one_line(text: &str, max_len: usize) -> String {
    let cleaned = text.replace('\n', " ").trim().to_string();
    if cleaned.chars().count() <= max_len {
        return cleaned;
    }
    format!("{}...", cleaned.chars().take(max_len).collect::<String>())
}

/// Split a long message into Telegram-sized chunks, preferring newline
/// boundaries so `<pre>` content is not cut mid-line.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > max_len {
        let hard_end = rest
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = match rest[..hard_end].rfind('\n') {
            Some(pos) if pos > 0 => pos,
            _ => hard_end,
        };
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Strip a surrounding markdown code fence (```json ... ```), if present.
///
/// Models occasionally wrap the JSON payload in a fence even when told not to.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let fence_re =
        Regex::new(r"(?s)^```[A-Za-z0-9_]*\s*\n?(.*?)\n?```$").expect("valid regex");
    match fence_re.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn draft_preview_escapes_entries() {
        let entries = vec!["2024-01-10 * \"Cafe <X>\"\n  Expenses:Food  5 USD".to_string()];
        let html = draft_preview("1 entry drafted", &entries);
        assert!(html.starts_with("1 entry drafted\n\n<pre>"));
        assert!(html.contains("Cafe &lt;X&gt;"));
        assert!(html.ends_with("</pre>"));
    }

    #[test]
    fn validation_failure_preview_marks_error_as_code() {
        let entries = vec!["2024-01-10 * \"Cafe\"\n  Expenses:Food  5 USD".to_string()];
        let html = validation_failure_preview("line 2: unbalanced <txn>", &entries);
        assert!(html.contains("<code>line 2: unbalanced &lt;txn&gt;</code>"));
        assert!(html.contains("<pre>"));
    }

    #[test]
    fn split_message_prefers_newlines() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_message(&text, 40);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(30));
        assert_eq!(chunks[1], "b".repeat(30));
    }

    #[test]
    fn split_message_hard_cuts_without_newlines() {
        let text = "x".repeat(100);
        let chunks = split_message(&text, 40);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
    }

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(split_message("hi", 4096), vec!["hi".to_string()]);
    }

    #[test]
    fn strips_json_fence() {
        let wrapped = "```json\n{\"entries\": []}\n```";
        assert_eq!(strip_code_fences(wrapped), "{\"entries\": []}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn truncates_to_one_line() {
        assert_eq!(truncate_one_line("a\nb", 10), "a b");
        assert_eq!(truncate_one_line(&"x".repeat(10), 4), "xxxx...");
    }
}

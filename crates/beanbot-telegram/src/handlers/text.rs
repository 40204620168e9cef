use std::sync::Arc;

use teloxide::prelude::*;

use crate::handlers::draft::{run_draft, HandlerContext};
use crate::router::AppState;

/// A message without a single digit has no amount to book.
fn looks_like_transaction(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

pub async fn handle_text(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text().map(|s| s.to_string()) else {
        return Ok(());
    };

    let user_id = user.id.0 as i64;
    let username = user
        .username
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let chat_id = msg.chat.id.0;

    if text.trim().is_empty() {
        return Ok(());
    }

    if !looks_like_transaction(&text) {
        let _ = bot
            .send_message(
                msg.chat.id,
                "I didn't detect any amounts or transaction details. Describe a transaction, \
                 e.g. \"spent 12.50 on lunch\", or upload a bank statement.",
            )
            .await;
        return Ok(());
    }

    run_draft(
        HandlerContext {
            state,
            chat_id,
            user_id,
            username,
        },
        "TEXT",
        text,
        false,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::looks_like_transaction;

    #[test]
    fn digit_gate() {
        assert!(looks_like_transaction("spent 12.50 on lunch"));
        assert!(looks_like_transaction("got ¥300"));
        assert!(!looks_like_transaction("hello there"));
        assert!(!looks_like_transaction("bought some coffee"));
    }
}

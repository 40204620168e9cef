use std::sync::Arc;

use teloxide::prelude::*;

use beanbot_core::{
    audit::AuditEvent,
    domain::{ChatId, UserId},
    formatting::{escape_html, pre_block, split_message},
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

async fn send_html_split(state: &AppState, chat_id: i64, html: &str) {
    let cap = state.messenger.capabilities().max_message_len;
    let limit = state.cfg.telegram_safe_limit.min(cap).max(200);
    for chunk in split_message(html, limit) {
        let _ = state.messenger.send_html(ChatId(chat_id), &chunk).await;
    }
}

fn start_text(state: &AppState) -> String {
    let mut out = String::from(
        "👋 Beancount bookkeeping bot.\n\n\
         Describe a transaction (\"spent 12.50 on lunch\") and I will draft balanced ledger \
         entries for you to confirm. Voice notes and bank statements (PDF/PNG/JPG) work too.\n\n\
         Commands:\n\
         /start — this help\n\
         /accounts — ledger accounts and balances\n\
         /instruction — show, set, or clear your drafting instruction",
    );
    if state.cfg.fava_enabled {
        out.push_str(&format!(
            "\n\nDashboard: http://{}:{}",
            state.cfg.fava_host, state.cfg.fava_port
        ));
    }
    out
}

pub async fn handle_command(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = user.id.0 as i64;
    let username = user
        .username
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let chat_id = msg.chat.id.0;
    let (cmd, args) = parse_command(text);
    let user = UserId(user_id);

    match cmd.as_str() {
        "start" | "help" => {
            send_html_split(&state, chat_id, &escape_html(&start_text(&state))).await;
        }
        "accounts" => match state.store.summarize_accounts(user) {
            Ok((lines, _)) if !lines.is_empty() => {
                let html = format!(
                    "Ledger accounts and balances:\n{}",
                    pre_block(&lines.join("\n"))
                );
                send_html_split(&state, chat_id, &html).await;
            }
            Ok(_) => {
                send_html_split(
                    &state,
                    chat_id,
                    "No accounts found in the ledger yet; try recording a transaction first.",
                )
                .await;
            }
            Err(e) => {
                send_html_split(
                    &state,
                    chat_id,
                    &format!("❌ Error: {}", escape_html(&e.to_string())),
                )
                .await;
            }
        },
        "instruction" => {
            handle_instruction(&state, chat_id, user, &args).await;
        }
        _ => {
            send_html_split(&state, chat_id, "Unknown command. Try /start.").await;
        }
    }

    if let Err(e) = state.audit.write(AuditEvent::message(
        user_id,
        &username,
        "COMMAND",
        text,
        None,
    )) {
        eprintln!("[AUDIT] Failed to write command event: {e}");
    }

    Ok(())
}

/// `/instruction` with no payload shows the current instruction;
/// `reset`/`clear` removes it; any other payload replaces it.
async fn handle_instruction(state: &AppState, chat_id: i64, user: UserId, args: &str) {
    let args = args.trim();

    if args.is_empty() {
        let html = match state.instructions.get(user) {
            Ok(Some(current)) => format!(
                "Current instruction:\n{}\n\nSend /instruction &lt;text&gt; to replace it, or \
                 /instruction clear to remove it.",
                pre_block(&current)
            ),
            Ok(None) => "No custom instruction set. Send /instruction &lt;text&gt; to add one, \
                         e.g. /instruction Always book groceries to Expenses:Food:Groceries in EUR."
                .to_string(),
            Err(e) => format!("❌ Error: {}", escape_html(&e.to_string())),
        };
        send_html_split(state, chat_id, &html).await;
        return;
    }

    if args.eq_ignore_ascii_case("reset") || args.eq_ignore_ascii_case("clear") {
        let html = match state.instructions.clear(user) {
            Ok(()) => "Custom instruction cleared.".to_string(),
            Err(e) => format!("❌ Error: {}", escape_html(&e.to_string())),
        };
        send_html_split(state, chat_id, &html).await;
        return;
    }

    let html = match state.instructions.set(user, args) {
        Ok(()) => format!(
            "Custom instruction saved. It will be applied to every draft:\n{}",
            pre_block(args)
        ),
        Err(e) => format!("❌ Error: {}", escape_html(&e.to_string())),
    };
    send_html_split(state, chat_id, &html).await;
}

#[cfg(test)]
mod tests {
    use super::parse_command;

    #[test]
    fn strips_bot_name_and_splits_args() {
        assert_eq!(
            parse_command("/instruction@beanbot Always use KZT"),
            ("instruction".to_string(), "Always use KZT".to_string())
        );
        assert_eq!(parse_command("/START"), ("start".to_string(), String::new()));
    }
}

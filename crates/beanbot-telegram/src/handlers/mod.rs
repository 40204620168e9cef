//! Telegram update handlers.
//!
//! Each handler:
//! - validates auth + rate limits
//! - extracts text or downloads media
//! - runs the draft or statement pipeline in `beanbot-core`
//!
//! Normal messages are sequentialized per chat so two drafts never interleave
//! on the same ledger; media groups are buffered first and locked later.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use beanbot_core::audit::AuditEvent;
use beanbot_core::domain::UserId;
use beanbot_core::security::is_authorized;

use crate::router::AppState;
mod callback;
mod commands;
mod document;
mod draft;
mod media_group;
mod photo;
mod text;
mod voice;

pub(crate) use media_group::StatementGroupBuffer;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let user_id = msg.from().map(|u| u.id.0 as i64);

    if !is_authorized(user_id.map(UserId), &state.cfg.telegram_allowed_users) {
        if let Some(id) = user_id {
            let username = msg
                .from()
                .and_then(|u| u.username.clone())
                .unwrap_or_else(|| "unknown".to_string());
            if let Err(e) = state.audit.write(AuditEvent::auth(id, &username, false)) {
                eprintln!("[AUDIT] Failed to write auth event: {e}");
            }
        }
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }

        let _guard = state.chat_locks.lock_chat(chat_id).await;
        return text::handle_text(bot, msg, state).await;
    }

    if msg.photo().is_some() {
        // Only lock for single photos; media groups are buffered and locked
        // when the group fires.
        if msg.media_group_id().is_none() {
            let _guard = state.chat_locks.lock_chat(chat_id).await;
            return photo::handle_photo(bot, msg, state).await;
        }
        return photo::handle_photo(bot, msg, state).await;
    }

    if msg.document().is_some() {
        if msg.media_group_id().is_none() {
            let _guard = state.chat_locks.lock_chat(chat_id).await;
            return document::handle_document(bot, msg, state).await;
        }
        return document::handle_document(bot, msg, state).await;
    }

    if msg.voice().is_some() {
        let _guard = state.chat_locks.lock_chat(chat_id).await;
        return voice::handle_voice(bot, msg, state).await;
    }

    let _ = bot
        .send_message(
            msg.chat.id,
            "I can handle text, voice notes, and bank statements (PDF/PNG/JPG).",
        )
        .await;

    Ok(())
}

//! Accept / Reject / Auto-fix buttons under drafted entries.

use std::sync::Arc;

use teloxide::prelude::*;

use beanbot_core::{
    audit::AuditEvent,
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::Error,
    formatting::{
        draft_preview, pre_block, truncate_one_line, validation_failure_preview,
        CALLBACK_ALERT_MAX,
    },
    messaging::types::{InlineKeyboard, PendingAction},
    pending::{DraftRecord, DraftStatus},
    security::is_authorized,
};

use crate::router::AppState;

use super::draft::{build_draft_request, deliver_update, spawn_typing};

pub async fn handle_callback(
    _bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let data = q.data.clone().unwrap_or_default();
    let user_id = q.from.id.0 as i64;
    let username = q
        .from
        .username
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    let answer = |text: Option<String>, alert: bool| {
        let state = state.clone();
        let cb_id = cb_id.clone();
        async move {
            let _ = state
                .messenger
                .answer_callback_query(&cb_id, text.as_deref(), alert)
                .await;
        }
    };

    if !is_authorized(Some(UserId(user_id)), &state.cfg.telegram_allowed_users) {
        answer(Some("Unauthorized".to_string()), true).await;
        return Ok(());
    }

    let Some((action, draft_id)) = PendingAction::parse(&data) else {
        answer(None, false).await;
        return Ok(());
    };

    let user = UserId(user_id);

    // Accept and auto-fix mutate the ledger and the pending store, so they
    // must hold the same per-chat lock as the message handlers.
    let lock_chat = match q.message.as_ref().map(|m| m.chat.id.0) {
        Some(id) => id,
        None => match state.pending.get(user, &draft_id) {
            Ok(Some(r)) => r.chat_id,
            Ok(None) => {
                answer(Some("Request not found".to_string()), true).await;
                return Ok(());
            }
            Err(e) => {
                answer(
                    Some(truncate_one_line(&e.to_string(), CALLBACK_ALERT_MAX)),
                    true,
                )
                .await;
                return Ok(());
            }
        },
    };
    let _guard = state.chat_locks.lock_chat(lock_chat).await;

    // Re-read under the lock; the status checks below must see the state
    // left by whichever handler held the lock before us.
    let record = match state.pending.get(user, &draft_id) {
        Ok(Some(r)) => r,
        Ok(None) => {
            answer(Some("Request not found".to_string()), true).await;
            return Ok(());
        }
        Err(e) => {
            answer(
                Some(truncate_one_line(&e.to_string(), CALLBACK_ALERT_MAX)),
                true,
            )
            .await;
            return Ok(());
        }
    };

    // Prefer the recorded keyboard message; fall back to the callback's own.
    let msg_ref = record.message_ref().or_else(|| {
        q.message.as_ref().map(|m| MessageRef {
            chat_id: ChatId(m.chat.id.0),
            message_id: MessageId(m.id.0),
        })
    });
    let Some(msg_ref) = msg_ref else {
        answer(Some("Request not found".to_string()), true).await;
        return Ok(());
    };

    match action {
        PendingAction::Accept => {
            if record.status != DraftStatus::Pending {
                answer(Some("Request already processed".to_string()), true).await;
                return Ok(());
            }
            accept(&state, user, &username, &record, msg_ref, &answer).await;
        }
        PendingAction::Reject => {
            if !matches!(record.status, DraftStatus::Pending | DraftStatus::Error) {
                answer(Some("Request already processed".to_string()), true).await;
                return Ok(());
            }
            let _ = state
                .pending
                .update(user, &record.draft_id(), |r| r.status = DraftStatus::Rejected);
            let _ = deliver_update(
                &state,
                msg_ref,
                "❌ Entry rejected. Please submit again or adjust the content.",
                None,
            )
            .await;
            answer(Some("❌ Rejected".to_string()), false).await;

            let ledger_path = state.store.user_ledger_path(user);
            if let Err(e) = state.audit.write(AuditEvent::ledger_write(
                user_id,
                &username,
                &ledger_path,
                record.entries.len(),
                "rejected",
            )) {
                eprintln!("[AUDIT] Failed to write ledger_write event: {e}");
            }
        }
        PendingAction::Autofix => {
            if record.status != DraftStatus::Error || record.error_context.is_none() {
                answer(Some("Request already processed".to_string()), true).await;
                return Ok(());
            }
            answer(Some("Attempting auto-fix...".to_string()), false).await;
            autofix(&state, user, &username, &record, msg_ref).await;
        }
    }

    Ok(())
}

async fn accept<F, Fut>(
    state: &Arc<AppState>,
    user: UserId,
    username: &str,
    record: &DraftRecord,
    msg_ref: MessageRef,
    answer: &F,
) where
    F: Fn(Option<String>, bool) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let ledger_path = state.store.user_ledger_path(user);

    match state.store.append_validated(user, &record.entries) {
        Ok(path) => {
            let _ = state
                .pending
                .update(user, &record.draft_id(), |r| r.status = DraftStatus::Accepted);

            let text = format!(
                "✅ Entry accepted and written to the ledger.\n\n{}",
                pre_block(&record.entries.join("\n\n"))
            );
            let _ = deliver_update(state, msg_ref, &text, None).await;
            answer(Some("✅ Accepted".to_string()), false).await;

            if let Err(e) = state.audit.write(AuditEvent::ledger_write(
                user.0,
                username,
                &path,
                record.entries.len(),
                "accepted",
            )) {
                eprintln!("[AUDIT] Failed to write ledger_write event: {e}");
            }
            if let Err(e) = state.dashboard.refresh().await {
                eprintln!("[FAVA] Refresh after accept failed: {e}");
            }
        }
        Err(err @ (Error::LedgerValidation(_) | Error::LedgerParse { .. })) => {
            // Rolled back; keep the draft around for auto-fix.
            let error_summary = err.to_string();
            let context = beanbot_core::interpreter::DraftRequest::autofix_context(
                &error_summary,
                &record.entries.join("\n\n"),
                &record.original_text,
            );
            let _ = state.pending.update(user, &record.draft_id(), |r| {
                r.status = DraftStatus::Error;
                r.error_context = Some(context);
            });

            let text = validation_failure_preview(&error_summary, &record.entries);
            let keyboard = InlineKeyboard::autofix_row(&record.draft_id());
            let _ = deliver_update(state, msg_ref, &text, Some(keyboard)).await;
            answer(
                Some(truncate_one_line(&error_summary, CALLBACK_ALERT_MAX)),
                true,
            )
            .await;

            if let Err(e) = state.audit.write(AuditEvent::ledger_write(
                user.0,
                username,
                &ledger_path,
                record.entries.len(),
                "rolled_back",
            )) {
                eprintln!("[AUDIT] Failed to write ledger_write event: {e}");
            }
        }
        Err(err) => {
            let short = truncate_one_line(&err.to_string(), CALLBACK_ALERT_MAX);
            answer(Some(format!("❌ Error: {short}")), true).await;
            if let Err(e) =
                state
                    .audit
                    .write(AuditEvent::error(user.0, username, &short, Some("accept")))
            {
                eprintln!("[AUDIT] Failed to write error event: {e}");
            }
        }
    }
}

async fn autofix(
    state: &Arc<AppState>,
    user: UserId,
    username: &str,
    record: &DraftRecord,
    msg_ref: MessageRef,
) {
    let request = match build_draft_request(
        state,
        user,
        &record.original_text,
        record.error_context.clone(),
    ) {
        Ok(r) => r,
        Err(e) => {
            let short = truncate_one_line(&e.to_string(), CALLBACK_ALERT_MAX);
            let _ = deliver_update(state, msg_ref, &format!("❌ Error: {short}"), None).await;
            return;
        }
    };

    let (stop_tx, typing_task) = spawn_typing(state.clone(), msg_ref.chat_id);
    let result = state.model.draft_entries(&request).await;
    let _ = stop_tx.send(());
    let _ = typing_task.await;

    let response = match result {
        Ok(r) if !r.entries.is_empty() => r,
        Ok(r) => {
            let summary = r
                .summary
                .unwrap_or_else(|| "auto-fix produced no entries".to_string());
            // Leave the Error status and keyboard in place for another try.
            let text =
                validation_failure_preview(&truncate_one_line(&summary, 200), &record.entries);
            let keyboard = InlineKeyboard::autofix_row(&record.draft_id());
            let _ = deliver_update(state, msg_ref, &text, Some(keyboard)).await;
            return;
        }
        Err(err) => {
            let short = truncate_one_line(&err.to_string(), 200);
            let text = validation_failure_preview(&short, &record.entries);
            let keyboard = InlineKeyboard::autofix_row(&record.draft_id());
            let _ = deliver_update(state, msg_ref, &text, Some(keyboard)).await;
            if let Err(e) =
                state
                    .audit
                    .write(AuditEvent::error(user.0, username, &short, Some("autofix")))
            {
                eprintln!("[AUDIT] Failed to write error event: {e}");
            }
            return;
        }
    };

    let updated = state.pending.update(user, &record.draft_id(), |r| {
        r.entries = response.entries.clone();
        r.summary = response.summary.clone();
        r.status = DraftStatus::Pending;
        r.error_context = None;
    });
    if let Err(e) = updated {
        eprintln!("[PENDING] Failed to store auto-fix result: {e}");
        return;
    }

    let text = format!(
        "🤖 Auto-fix suggestions (pending your confirmation).\n\n{}",
        draft_preview(response.summary.as_deref().unwrap_or(""), &response.entries)
    );
    let keyboard = InlineKeyboard::confirm_row(&record.draft_id());
    if let Ok(delivered) = deliver_update(state, msg_ref, &text, Some(keyboard)).await {
        let _ = state.pending.update(user, &record.draft_id(), |r| {
            r.message_id = Some(delivered.message_id.0);
        });
    }

    if let Err(e) = state.audit.write(AuditEvent::message(
        user.0,
        username,
        "AUTOFIX",
        &record.original_text,
        Some(&response.entries.join("\n\n")),
    )) {
        eprintln!("[AUDIT] Failed to write message event: {e}");
    }
}

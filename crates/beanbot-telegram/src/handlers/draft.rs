//! Shared pipeline: turn user input into drafted ledger entries (or a
//! statement import) waiting under an Accept/Reject keyboard.

use std::path::Path;
use std::sync::Arc;

use chrono::{Datelike, Local};
use teloxide::prelude::ResponseResult;

use beanbot_core::{
    audit::AuditEvent,
    domain::{ChatId, MessageRef, UserId},
    formatting::{draft_preview, escape_html, split_message, truncate_one_line},
    interpreter::{DraftRequest, StatementRequest},
    messaging::types::{ChatAction, InlineKeyboard},
    pending::DraftSource,
    Result,
};

use crate::router::AppState;

/// How many recent transactions feed the statement extraction prompt.
const HISTORY_LIMIT: usize = 20;

#[derive(Clone)]
pub struct HandlerContext {
    pub state: Arc<AppState>,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
}

/// Returns false (after notifying the user) when the bucket is empty.
pub async fn check_rate_limit(ctx: &HandlerContext) -> bool {
    let mut rl = ctx.state.rate_limiter.lock().await;
    let (ok, retry_after) = rl.check(UserId(ctx.user_id));
    drop(rl);
    if ok {
        return true;
    }

    let retry = retry_after.unwrap_or_default().as_secs_f64();
    if let Err(e) = ctx
        .state
        .audit
        .write(AuditEvent::rate_limit(ctx.user_id, &ctx.username, retry))
    {
        eprintln!("[AUDIT] Failed to write rate_limit event: {e}");
    }
    let _ = ctx
        .state
        .messenger
        .send_html(
            ChatId(ctx.chat_id),
            &format!("⏳ Rate limited. Please wait {retry:.1} seconds."),
        )
        .await;
    false
}

/// Typing indicator loop (best-effort). Send on the returned channel to stop.
pub fn spawn_typing(
    state: Arc<AppState>,
    chat_id: ChatId,
) -> (tokio::sync::oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(3));
        loop {
            tokio::select! {
              _ = tick.tick() => {
                let _ = state.messenger.send_chat_action(chat_id, ChatAction::Typing).await;
              }
              _ = &mut stop_rx => break,
            }
        }
    });
    (stop_tx, task)
}

/// Replace the status message with `html`, chunking when it exceeds the safe
/// limit. The keyboard lands on the last chunk; the returned ref points at
/// the message that carries it.
pub async fn deliver_update(
    state: &AppState,
    status: MessageRef,
    html: &str,
    keyboard: Option<InlineKeyboard>,
) -> Result<MessageRef> {
    let cap = state.messenger.capabilities().max_message_len;
    let limit = state.cfg.telegram_safe_limit.min(cap).max(200);
    let chunks = split_message(html, limit);

    if chunks.len() == 1 {
        state
            .messenger
            .edit_html_with_keyboard(status, &chunks[0], keyboard)
            .await?;
        return Ok(status);
    }

    state
        .messenger
        .edit_html_with_keyboard(status, &chunks[0], None)
        .await?;
    let mut target = status;
    let last = chunks.len() - 1;
    for (i, chunk) in chunks.iter().enumerate().skip(1) {
        if i == last {
            target = match keyboard.clone() {
                Some(kb) => {
                    state
                        .messenger
                        .send_inline_keyboard(status.chat_id, chunk, kb)
                        .await?
                }
                None => state.messenger.send_html(status.chat_id, chunk).await?,
            };
        } else {
            state.messenger.send_html(status.chat_id, chunk).await?;
        }
    }
    Ok(target)
}

pub fn build_draft_request(
    state: &AppState,
    user: UserId,
    text: &str,
    error_context: Option<String>,
) -> Result<DraftRequest> {
    let (account_summary, _) = state.store.summarize_accounts(user)?;
    Ok(DraftRequest {
        text: text.to_string(),
        account_summary,
        ledger_empty: state.store.is_empty(user),
        custom_instruction: state.instructions.get(user)?,
        error_context,
        today: Local::now().date_naive(),
    })
}

/// Text (or transcript) to drafted entries with a confirmation keyboard.
pub async fn run_draft(
    ctx: HandlerContext,
    message_type: &str,
    text: String,
    skip_rate_limit: bool,
) -> ResponseResult<()> {
    if text.trim().is_empty() {
        return Ok(());
    }
    if !skip_rate_limit && !check_rate_limit(&ctx).await {
        return Ok(());
    }

    let HandlerContext {
        state,
        chat_id,
        user_id,
        username,
    } = ctx;
    let chat = ChatId(chat_id);
    let user = UserId(user_id);

    let status = state
        .messenger
        .send_html(chat, "Generating accounting entries, please wait...")
        .await
        .ok();

    let (stop_tx, typing_task) = spawn_typing(state.clone(), chat);

    let result = match build_draft_request(&state, user, &text, None) {
        Ok(req) => state.model.draft_entries(&req).await,
        Err(e) => Err(e),
    };

    let _ = stop_tx.send(());
    let _ = typing_task.await;

    let response = match result {
        Ok(resp) => resp,
        Err(err) => {
            let short = truncate_one_line(&err.to_string(), 200);
            let note = format!("❌ Error: {}", escape_html(&short));
            match status {
                Some(st) => {
                    let _ = state.messenger.edit_html(st, &note).await;
                }
                None => {
                    let _ = state.messenger.send_html(chat, &note).await;
                }
            }
            if let Err(e) = state.audit.write(AuditEvent::error(
                user_id,
                &username,
                &short,
                Some(message_type),
            )) {
                eprintln!("[AUDIT] Failed to write error event: {e}");
            }
            return Ok(());
        }
    };

    // No entries: the summary explains what was missing. Nothing to confirm.
    if response.entries.is_empty() {
        let summary = response
            .summary
            .unwrap_or_else(|| "I could not derive a transaction from that message.".to_string());
        let html = escape_html(&summary);
        match status {
            Some(st) => {
                let _ = deliver_update(&state, st, &html, None).await;
            }
            None => {
                let _ = state.messenger.send_html(chat, &html).await;
            }
        }
        if let Err(e) = state.audit.write(AuditEvent::message(
            user_id,
            &username,
            message_type,
            &text,
            Some(&summary),
        )) {
            eprintln!("[AUDIT] Failed to write message event: {e}");
        }
        return Ok(());
    }

    let record = match state.pending.create(
        user,
        chat,
        response.entries.clone(),
        response.summary.clone(),
        text.clone(),
        DraftSource::Text,
    ) {
        Ok(r) => r,
        Err(e) => {
            let note = format!(
                "❌ Error: {}",
                escape_html(&truncate_one_line(&e.to_string(), 200))
            );
            let _ = state.messenger.send_html(chat, &note).await;
            return Ok(());
        }
    };

    let preview = draft_preview(record.summary.as_deref().unwrap_or(""), &record.entries);
    let keyboard = InlineKeyboard::confirm_row(&record.draft_id());
    let delivered = match status {
        Some(st) => deliver_update(&state, st, &preview, Some(keyboard)).await,
        None => {
            state
                .messenger
                .send_inline_keyboard(chat, &preview, keyboard)
                .await
        }
    };
    if let Ok(msg_ref) = delivered {
        let _ = state.pending.update(user, &record.draft_id(), |r| {
            r.message_id = Some(msg_ref.message_id.0);
        });
    }

    if let Err(e) = state.audit.write(AuditEvent::message(
        user_id,
        &username,
        message_type,
        &text,
        Some(&record.entries.join("\n\n")),
    )) {
        eprintln!("[AUDIT] Failed to write message event: {e}");
    }

    Ok(())
}

/// Downloaded statement file to drafted import entries.
pub async fn run_statement(
    ctx: HandlerContext,
    path: &Path,
    note: Option<String>,
    skip_rate_limit: bool,
) -> ResponseResult<()> {
    if !skip_rate_limit && !check_rate_limit(&ctx).await {
        return Ok(());
    }

    let HandlerContext {
        state,
        chat_id,
        user_id,
        username,
    } = ctx;
    let chat = ChatId(chat_id);
    let user = UserId(user_id);

    let file_label = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "statement".to_string());

    let status = match state
        .messenger
        .send_html(chat, "Extracting statement, please wait...")
        .await
    {
        Ok(m) => m,
        Err(_) => return Ok(()),
    };

    let report_error = |state: Arc<AppState>, username: String, short: String| async move {
        let note = format!("❌ Error: {}", escape_html(&short));
        let _ = state.messenger.edit_html(status, &note).await;
        if let Err(e) = state.audit.write(AuditEvent::error(
            user_id,
            &username,
            &short,
            Some("STATEMENT"),
        )) {
            eprintln!("[AUDIT] Failed to write error event: {e}");
        }
    };

    // Extraction may only name accounts that already exist, so a virgin
    // ledger has nothing to classify against.
    let allowed_accounts = match state.store.list_accounts(user) {
        Ok(a) => a,
        Err(e) => {
            report_error(state, username, truncate_one_line(&e.to_string(), 200)).await;
            return Ok(());
        }
    };
    if allowed_accounts.is_empty() {
        let _ = state
            .messenger
            .edit_html(
                status,
                "The ledger has no accounts yet. Record a few transactions first so statement \
                 imports can reuse your account names.",
            )
            .await;
        return Ok(());
    }

    let request = {
        let summary = state.store.summarize_accounts(user).map(|(lines, _)| lines);
        let history = state.store.transaction_history_summary(user, HISTORY_LIMIT);
        match (summary, history) {
            (Ok(account_summary), Ok(history_lines)) => StatementRequest {
                path: path.to_path_buf(),
                note,
                account_summary,
                allowed_accounts,
                history_lines,
                reference_year: Local::now().year(),
            },
            (Err(e), _) | (_, Err(e)) => {
                report_error(state, username, truncate_one_line(&e.to_string(), 200)).await;
                return Ok(());
            }
        }
    };

    let (stop_tx, typing_task) = spawn_typing(state.clone(), chat);
    let extracted = state.model.extract_statement(&request).await;
    let _ = stop_tx.send(());
    let _ = typing_task.await;

    let statement = match extracted {
        Ok(s) => s,
        Err(err) => {
            report_error(state, username, truncate_one_line(&err.to_string(), 200)).await;
            return Ok(());
        }
    };

    let import = match beanbot_core::interpreter::statement::generate_statement_entries(
        &state.store,
        user,
        &statement,
        path,
        Local::now().naive_local(),
    ) {
        Ok(i) => i,
        Err(err) => {
            report_error(state, username, truncate_one_line(&err.to_string(), 200)).await;
            return Ok(());
        }
    };

    if import.new_count == 0 {
        let text = format!(
            "No new transactions detected in the uploaded statement. Skipped {} duplicate or \
             zero-amount entries.",
            import.skipped
        );
        let _ = state.messenger.edit_html(status, &text).await;
        if let Err(e) = state.audit.write(AuditEvent::message(
            user_id,
            &username,
            "STATEMENT",
            &file_label,
            Some(&text),
        )) {
            eprintln!("[AUDIT] Failed to write message event: {e}");
        }
        return Ok(());
    }

    let summary = format!(
        "Statement extraction ready for confirmation.\nNew transactions detected: {}\nSkipped {} \
         entries already present in the ledger.",
        import.new_count, import.skipped
    );
    let record = match state.pending.create(
        user,
        chat,
        import.entries.clone(),
        Some(summary.clone()),
        file_label.clone(),
        DraftSource::Statement,
    ) {
        Ok(r) => r,
        Err(e) => {
            report_error(state, username, truncate_one_line(&e.to_string(), 200)).await;
            return Ok(());
        }
    };

    let preview = draft_preview(&summary, &record.entries);
    let keyboard = InlineKeyboard::confirm_row(&record.draft_id());
    if let Ok(msg_ref) = deliver_update(&state, status, &preview, Some(keyboard)).await {
        let _ = state.pending.update(user, &record.draft_id(), |r| {
            r.message_id = Some(msg_ref.message_id.0);
        });
    }

    if let Err(e) = state.audit.write(AuditEvent::message(
        user_id,
        &username,
        "STATEMENT",
        &file_label,
        Some(&record.entries.join("\n\n")),
    )) {
        eprintln!("[AUDIT] Failed to write message event: {e}");
    }

    Ok(())
}

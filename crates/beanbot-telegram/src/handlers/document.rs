use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use teloxide::{net::Download, prelude::*};

use crate::router::AppState;

use super::draft::{run_statement, HandlerContext};

static DOC_COUNTER: AtomicUsize = AtomicUsize::new(1);

const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB

fn statement_extension(name: &str, mime: Option<&str>) -> Option<&'static str> {
    if mime == Some("application/pdf") {
        return Some("pdf");
    }
    let lower = name.to_lowercase();
    for ext in ["pdf", "png", "jpg", "jpeg"] {
        if lower.ends_with(&format!(".{ext}")) {
            return Some(ext);
        }
    }
    match mime {
        Some("image/png") => Some("png"),
        Some("image/jpeg") => Some("jpg"),
        _ => None,
    }
}

async fn download_document(
    bot: &Bot,
    state: &AppState,
    doc: &teloxide::types::Document,
    ext: &str,
) -> anyhow::Result<std::path::PathBuf> {
    let file = bot.get_file(doc.file.id.clone()).await?;

    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let n = DOC_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = state
        .cfg
        .temp_dir
        .join(format!("statement_{ts}_{n}.{ext}"));

    let mut dst = tokio::fs::File::create(&path).await?;
    bot.download_file(&file.path, &mut dst).await?;
    Ok(path)
}

pub async fn handle_document(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(doc) = msg.document() else {
        return Ok(());
    };

    let user_id = user.id.0 as i64;
    let username = user
        .username
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let chat_id = msg.chat.id.0;

    let size = doc.file.size as u64;
    if size > MAX_FILE_SIZE {
        let _ = bot
            .send_message(msg.chat.id, "❌ File too large. Maximum size is 10MB.")
            .await;
        return Ok(());
    }

    let file_name = doc
        .file_name
        .clone()
        .unwrap_or_else(|| "statement".to_string());
    let mime = doc.mime_type.as_ref().map(|m| m.essence_str().to_string());

    let Some(ext) = statement_extension(&file_name, mime.as_deref()) else {
        let _ = bot
            .send_message(
                msg.chat.id,
                "❌ Unsupported file type. Bank statements must be PDF, PNG, or JPG.",
            )
            .await;
        return Ok(());
    };

    let media_group_id = msg.media_group_id().map(|s| s.to_string());
    let caption = msg.caption().map(|s| s.to_string());

    let ctx = HandlerContext {
        state: state.clone(),
        chat_id,
        user_id,
        username,
    };

    let doc_path = match download_document(&bot, &state, doc, ext).await {
        Ok(p) => p,
        Err(e) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "❌ Failed to download document: {}",
                        e.to_string().chars().take(100).collect::<String>()
                    ),
                )
                .await;
            return Ok(());
        }
    };

    let Some(group_id) = media_group_id else {
        let _ = run_statement(ctx, &doc_path, caption, false).await;
        let _ = tokio::fs::remove_file(&doc_path).await;
        return Ok(());
    };

    let timeout = state.cfg.media_group_timeout;
    let _ = state
        .media_groups
        .add_to_group(ctx, group_id, doc_path, caption, timeout)
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::statement_extension;

    #[test]
    fn accepts_statement_types_only() {
        assert_eq!(statement_extension("jan.pdf", None), Some("pdf"));
        assert_eq!(statement_extension("scan.PNG", None), Some("png"));
        assert_eq!(statement_extension("x", Some("application/pdf")), Some("pdf"));
        assert_eq!(statement_extension("x", Some("image/jpeg")), Some("jpg"));
        assert_eq!(statement_extension("notes.txt", Some("text/plain")), None);
        assert_eq!(statement_extension("data.zip", None), None);
    }
}

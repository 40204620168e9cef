use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use teloxide::{net::Download, prelude::*};

use crate::router::AppState;

use super::draft::{run_statement, HandlerContext};

static PHOTO_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Telegram orders photo sizes smallest first; the last is the original.
async fn download_photo(
    bot: &Bot,
    state: &AppState,
    photos: &[teloxide::types::PhotoSize],
) -> anyhow::Result<std::path::PathBuf> {
    let best = photos
        .last()
        .ok_or_else(|| anyhow::anyhow!("no photo sizes"))?;
    let file = bot.get_file(best.file.id.clone()).await?;

    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let n = PHOTO_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = state.cfg.temp_dir.join(format!("statement_{ts}_{n}.jpg"));

    let mut dst = tokio::fs::File::create(&path).await?;
    bot.download_file(&file.path, &mut dst).await?;

    Ok(path)
}

pub async fn handle_photo(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(photos) = msg.photo() else {
        return Ok(());
    };

    let user_id = user.id.0 as i64;
    let username = user
        .username
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let chat_id = msg.chat.id.0;

    let media_group_id = msg.media_group_id().map(|s| s.to_string());
    let caption = msg.caption().map(|s| s.to_string());

    let ctx = HandlerContext {
        state: state.clone(),
        chat_id,
        user_id,
        username,
    };

    let photo_path = match download_photo(&bot, &state, photos).await {
        Ok(p) => p,
        Err(e) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "❌ Failed to download photo: {}",
                        e.to_string().chars().take(100).collect::<String>()
                    ),
                )
                .await;
            return Ok(());
        }
    };

    // Single photo: treat as a one-page statement immediately.
    let Some(group_id) = media_group_id else {
        let _ = run_statement(ctx, &photo_path, caption, false).await;
        let _ = tokio::fs::remove_file(&photo_path).await;
        return Ok(());
    };

    // Album: buffer pages and process after the debounce timeout.
    let timeout = state.cfg.media_group_timeout;
    let _ = state
        .media_groups
        .add_to_group(ctx, group_id, photo_path, caption, timeout)
        .await;

    Ok(())
}

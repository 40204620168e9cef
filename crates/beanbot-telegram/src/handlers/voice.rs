use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    sync::Arc,
};

use teloxide::{net::Download, prelude::*};

use beanbot_core::formatting::truncate_one_line;

use crate::router::AppState;

use super::draft::{check_rate_limit, run_draft, HandlerContext};

static VOICE_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Vocabulary hint for the audio model; bank amounts and merchant names
/// transcribe poorly without it.
const TRANSCRIPTION_PROMPT: &str =
    "The recording describes financial transactions: amounts, currencies, merchants, and dates.";

async fn download_voice(
    bot: &Bot,
    state: &AppState,
    voice: &teloxide::types::Voice,
) -> anyhow::Result<PathBuf> {
    let file = bot.get_file(voice.file.id.clone()).await?;

    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let n = VOICE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = state.cfg.temp_dir.join(format!("voice_{ts}_{n}.ogg"));

    let mut dst = tokio::fs::File::create(&path).await?;
    bot.download_file(&file.path, &mut dst).await?;
    Ok(path)
}

pub async fn handle_voice(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(voice) = msg.voice() else {
        return Ok(());
    };

    let user_id = user.id.0 as i64;
    let username = user
        .username
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let chat_id = msg.chat.id.0;

    let Some(transcriber) = state.transcriber.clone() else {
        let _ = bot
            .send_message(
                msg.chat.id,
                "Voice transcription needs the OpenAI backend. Set LLM_PROVIDER=openai in .env",
            )
            .await;
        return Ok(());
    };

    let ctx = HandlerContext {
        state: state.clone(),
        chat_id,
        user_id,
        username,
    };

    // Rate limit before the download; the draft pipeline skips its own check.
    if !check_rate_limit(&ctx).await {
        return Ok(());
    }

    let status = bot
        .send_message(msg.chat.id, "🎤 Transcribing...")
        .await
        .ok();

    let voice_path = match download_voice(&bot, &state, voice).await {
        Ok(p) => p,
        Err(e) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "❌ Failed to download voice: {}",
                        e.to_string().chars().take(200).collect::<String>()
                    ),
                )
                .await;
            return Ok(());
        }
    };

    let transcript = transcriber
        .transcribe_file(&voice_path, TRANSCRIPTION_PROMPT)
        .await;
    let _ = tokio::fs::remove_file(&voice_path).await;

    let transcript = match transcript {
        Ok(t) => t,
        Err(e) => {
            let note = format!(
                "❌ Transcription failed: {}",
                truncate_one_line(&e.to_string(), 200)
            );
            match &status {
                Some(st) => {
                    let _ = bot.edit_message_text(st.chat.id, st.id, note).await;
                }
                None => {
                    let _ = bot.send_message(msg.chat.id, note).await;
                }
            }
            return Ok(());
        }
    };

    // Show what was heard before drafting from it.
    if let Some(st) = &status {
        let preview = truncate_one_line(&transcript, 300);
        let _ = bot
            .edit_message_text(st.chat.id, st.id, format!("🎤 \"{preview}\""))
            .await;
    }

    if !transcript.chars().any(|c| c.is_ascii_digit()) {
        let _ = bot
            .send_message(
                msg.chat.id,
                "I didn't detect any amounts or transaction details in the recording. Mention \
                 the amount, e.g. \"spent 12.50 on lunch\".",
            )
            .await;
        return Ok(());
    }

    run_draft(ctx, "VOICE", transcript, true).await
}

//! Media-group buffering for multi-page statements.
//!
//! Telegram delivers an album as separate messages sharing a
//! `media_group_id`; each new page resets the debounce timer, and the group
//! is processed page by page once the timer fires.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use beanbot_core::domain::{ChatId, MessageId, MessageRef};

use crate::router::AppState;

use super::draft::{check_rate_limit, run_statement, HandlerContext};

struct PendingGroup {
    ctx: HandlerContext,
    items: Vec<PathBuf>,
    caption: Option<String>,
    status_msg: MessageRef,
    cancel: CancellationToken,
}

/// One buffer per running bot, owned by `AppState`.
#[derive(Default)]
pub struct StatementGroupBuffer {
    pending: tokio::sync::Mutex<HashMap<String, PendingGroup>>,
}

impl StatementGroupBuffer {
    pub async fn add_to_group(
        self: &Arc<Self>,
        ctx: HandlerContext,
        media_group_id: String,
        item_path: PathBuf,
        caption: Option<String>,
        timeout: Duration,
    ) -> bool {
        let mut map = self.pending.lock().await;
        if let Some(group) = map.get_mut(&media_group_id) {
            // Existing group: push and reset timeout.
            group.items.push(item_path);
            if group.caption.is_none() && caption.is_some() {
                group.caption = caption;
            }

            group.cancel.cancel();
            let cancel = CancellationToken::new();
            group.cancel = cancel.clone();
            drop(map);
            self.spawn_timer(media_group_id, cancel, timeout);
            return true;
        }

        // First page. Rate limit once for the whole group.
        if !check_rate_limit(&ctx).await {
            return false;
        }

        let chat = ChatId(ctx.chat_id);
        let status_msg = match ctx
            .state
            .messenger
            .send_html(chat, "📄 Receiving statement pages...")
            .await
        {
            Ok(m) => m,
            Err(_) => MessageRef {
                chat_id: chat,
                message_id: MessageId(0),
            },
        };

        let cancel = CancellationToken::new();
        map.insert(
            media_group_id.clone(),
            PendingGroup {
                ctx,
                items: vec![item_path],
                caption,
                status_msg,
                cancel: cancel.clone(),
            },
        );

        drop(map);
        self.spawn_timer(media_group_id, cancel, timeout);
        true
    }

    fn spawn_timer(self: &Arc<Self>, media_group_id: String, cancel: CancellationToken, timeout: Duration) {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
              _ = cancel.cancelled() => {}
              _ = tokio::time::sleep(timeout) => {
                buffer.process_group(&media_group_id).await;
              }
            }
        });
    }

    async fn process_group(self: &Arc<Self>, media_group_id: &str) {
        let group = {
            let mut map = self.pending.lock().await;
            map.remove(media_group_id)
        };

        let Some(group) = group else {
            return;
        };

        let state: Arc<AppState> = group.ctx.state.clone();
        let count = group.items.len();
        let _ = state
            .messenger
            .edit_html(
                group.status_msg,
                &format!("📄 Processing {count} statement page(s)..."),
            )
            .await;

        // Sequentialize per chat, same as the text handler lock.
        let _guard = state.chat_locks.lock_chat(group.ctx.chat_id).await;

        for path in &group.items {
            let _ = run_statement(group.ctx.clone(), path, group.caption.clone(), true).await;
            let _ = tokio::fs::remove_file(path).await;
        }

        let _ = state.messenger.delete_message(group.status_msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use beanbot_core::{
        audit::AuditLogger,
        config::{Config, LlmProvider},
        dashboard::{DashboardConfig, DashboardSupervisor},
        errors::Error,
        instructions::InstructionStore,
        interpreter::{
            BankStatement, DraftRequest, DraftResponse, EntryModel, StatementRequest,
        },
        ledger::LedgerStore,
        messaging::{
            port::MessagingPort,
            types::{ChatAction, InlineKeyboard, MessagingCapabilities},
        },
        pending::PendingStore,
        security::RateLimiter,
        Result,
    };

    use crate::router::ChatLocks;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<String>>,
        edits: Mutex<Vec<String>>,
        deletes: Mutex<usize>,
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_html: true,
                supports_edit: true,
                supports_chat_actions: true,
                supports_inline_keyboards: true,
                max_message_len: 4096,
            }
        }

        async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
            self.sent.lock().await.push(html.to_string());
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn edit_html(&self, _msg: MessageRef, html: &str) -> Result<()> {
            self.edits.lock().await.push(html.to_string());
            Ok(())
        }

        async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
            *self.deletes.lock().await += 1;
            Ok(())
        }

        async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
            Ok(())
        }

        async fn send_inline_keyboard(
            &self,
            chat_id: ChatId,
            html: &str,
            _keyboard: InlineKeyboard,
        ) -> Result<MessageRef> {
            self.sent.lock().await.push(html.to_string());
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(2),
            })
        }

        async fn edit_html_with_keyboard(
            &self,
            msg: MessageRef,
            html: &str,
            _keyboard: Option<InlineKeyboard>,
        ) -> Result<()> {
            self.edit_html(msg, html).await
        }

        async fn answer_callback_query(
            &self,
            _callback_id: &str,
            _text: Option<&str>,
            _show_alert: bool,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct NoModel;

    #[async_trait]
    impl EntryModel for NoModel {
        async fn draft_entries(&self, _req: &DraftRequest) -> Result<DraftResponse> {
            Err(Error::External("model not expected in this test".into()))
        }

        async fn extract_statement(&self, _req: &StatementRequest) -> Result<BankStatement> {
            Err(Error::External("model not expected in this test".into()))
        }
    }

    fn tmp_dir(prefix: &str) -> PathBuf {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let dir = std::env::temp_dir().join(format!(
            "beanbot-groups-{prefix}-{}-{}",
            std::process::id(),
            millis
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_state(messenger: Arc<RecordingMessenger>, dir: &PathBuf) -> Arc<AppState> {
        let cfg = Config {
            telegram_bot_token: "test-token".to_string(),
            telegram_allowed_users: vec![],
            llm_provider: LlmProvider::OpenAi,
            llm_api_key: "k".to_string(),
            llm_base_url: "http://localhost".to_string(),
            llm_model: "m".to_string(),
            llm_timeout: Duration::from_secs(5),
            transcription_available: false,
            ledger_root: dir.join("ledgers"),
            state_dir: dir.join("state"),
            temp_dir: dir.join("tmp"),
            telegram_safe_limit: 4000,
            audit_log_path: dir.join("audit.log"),
            audit_log_json: false,
            rate_limit_enabled: false,
            rate_limit_requests: 20,
            rate_limit_window: Duration::from_secs(60),
            media_group_timeout: Duration::from_millis(50),
            fava_enabled: false,
            fava_path: None,
            fava_host: "127.0.0.1".to_string(),
            fava_port: 5001,
        };
        let cfg = Arc::new(cfg);

        Arc::new(AppState {
            store: LedgerStore::new(cfg.ledger_root.clone()),
            pending: PendingStore::new(cfg.state_dir.clone()),
            instructions: InstructionStore::new(cfg.state_dir.clone()),
            model: Arc::new(NoModel),
            transcriber: None,
            messenger,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                false,
                cfg.rate_limit_requests,
                cfg.rate_limit_window,
            ))),
            chat_locks: Arc::new(ChatLocks::default()),
            audit: Arc::new(AuditLogger::new(cfg.audit_log_path.clone(), false)),
            dashboard: Arc::new(DashboardSupervisor::new(DashboardConfig {
                enabled: false,
                fava_path: PathBuf::from("fava"),
                host: "127.0.0.1".to_string(),
                port: 5001,
                ledger_root: cfg.ledger_root.clone(),
            })),
            media_groups: Arc::new(StatementGroupBuffer::default()),
            cfg,
        })
    }

    #[tokio::test]
    async fn new_page_resets_debounce_and_group_flushes_once() {
        let messenger = Arc::new(RecordingMessenger::default());
        let dir = tmp_dir("debounce");
        let state = test_state(messenger.clone(), &dir);

        let ctx = HandlerContext {
            state: state.clone(),
            chat_id: 10,
            user_id: 10,
            username: "tester".to_string(),
        };
        let buffer = Arc::new(StatementGroupBuffer::default());
        let timeout = Duration::from_millis(100);

        assert!(
            buffer
                .add_to_group(ctx.clone(), "g1".into(), dir.join("p1.jpg"), None, timeout)
                .await
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(
            buffer
                .add_to_group(ctx, "g1".into(), dir.join("p2.jpg"), None, timeout)
                .await
        );

        // 120ms after the first page: the original timer would have fired,
        // but the second page reset it.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(messenger.edits.lock().await.is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let edits = messenger.edits.lock().await.clone();
        let flushes = edits
            .iter()
            .filter(|e| e.contains("Processing 2 statement page(s)"))
            .count();
        assert_eq!(flushes, 1);
        assert_eq!(*messenger.deletes.lock().await, 1);
    }
}

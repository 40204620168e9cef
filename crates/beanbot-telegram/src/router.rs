use std::{collections::HashMap, path::PathBuf, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};

use beanbot_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use beanbot_core::{
    audit::AuditLogger,
    config::Config,
    dashboard::{DashboardConfig, DashboardSupervisor},
    instructions::InstructionStore,
    interpreter::{EntryModel, Transcriber},
    ledger::LedgerStore,
    messaging::port::MessagingPort,
    pending::PendingStore,
    security::RateLimiter,
};

use crate::handlers;
use crate::TelegramMessenger;

pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: LedgerStore,
    pub pending: PendingStore,
    pub instructions: InstructionStore,
    pub model: Arc<dyn EntryModel>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub messenger: Arc<dyn MessagingPort>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub chat_locks: Arc<ChatLocks>,
    pub audit: Arc<AuditLogger>,
    pub dashboard: Arc<DashboardSupervisor>,
    pub media_groups: Arc<handlers::StatementGroupBuffer>,
}

#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(
    cfg: Arc<Config>,
    model: Arc<dyn EntryModel>,
    transcriber: Option<Arc<dyn Transcriber>>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Basic startup info.
    if let Ok(me) = bot.get_me().await {
        println!("beanbot started: @{}", me.username());
    }
    println!("Ledger root: {}", cfg.ledger_root.display());
    println!("Allowed users: {}", cfg.telegram_allowed_users.len());

    // Wrap the raw Telegram messenger with a throttling decorator to reduce
    // 429s. We still keep a RetryAfter retry at the Telegram adapter layer.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let dashboard = Arc::new(DashboardSupervisor::new(DashboardConfig {
        enabled: cfg.fava_enabled,
        fava_path: cfg.fava_path.clone().unwrap_or_else(|| PathBuf::from("fava")),
        host: cfg.fava_host.clone(),
        port: cfg.fava_port,
        ledger_root: cfg.ledger_root.clone(),
    }));
    if let Err(e) = dashboard.start().await {
        eprintln!("[FAVA] Failed to start dashboard: {e}");
    }

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        store: LedgerStore::new(cfg.ledger_root.clone()),
        pending: PendingStore::new(cfg.state_dir.clone()),
        instructions: InstructionStore::new(cfg.state_dir.clone()),
        model,
        transcriber,
        messenger,
        rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        ))),
        chat_locks: Arc::new(ChatLocks::default()),
        audit: Arc::new(AuditLogger::new(
            cfg.audit_log_path.clone(),
            cfg.audit_log_json,
        )),
        dashboard,
        media_groups: Arc::new(handlers::StatementGroupBuffer::default()),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .build()
        .dispatch()
        .await;

    state.dashboard.stop().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::ChatLocks;
    use std::{sync::Arc, time::Duration};

    #[tokio::test]
    async fn same_chat_is_serialized_other_chats_are_not() {
        let locks = Arc::new(ChatLocks::default());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let guard = locks.lock_chat(7).await;

        let waiter = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = locks.lock_chat(7).await;
                order.lock().await.push("waiter");
            })
        };

        // A different chat id must not block.
        let _other = tokio::time::timeout(Duration::from_secs(1), locks.lock_chat(8))
            .await
            .expect("different chat blocked");

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().await.push("holder");
        drop(guard);
        waiter.await.unwrap();

        assert_eq!(*order.lock().await, vec!["holder", "waiter"]);
    }
}

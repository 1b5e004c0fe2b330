use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::UpdateKind};

use tracing::{info, warn};

use vmb_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use vmb_core::{
    audit::AuditLogger,
    config::Config,
    media::MediaOps,
    messaging::port::MessagingPort,
    orchestrator::{Orchestrator, PipelinePolicy},
    registry::SessionRegistry,
    scratch::ScratchStore,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub messenger: Arc<dyn MessagingPort>,
    pub audit: Arc<AuditLogger>,
}

/// Dispatcher queue key. Updates sharing a key run one at a time, in arrival order,
/// so uploads from one chat are appended in the order they were sent.
///
/// `/cancel`, `/status` and the status button get no key: they run immediately
/// instead of waiting behind a download in the same chat.
fn distribution_key(update: &Update) -> Option<teloxide::types::ChatId> {
    let unqueued = match &update.kind {
        UpdateKind::Message(msg) => handlers::runs_unqueued(msg.text(), None),
        UpdateKind::CallbackQuery(q) => handlers::runs_unqueued(None, q.data.as_deref()),
        _ => false,
    };
    if unqueued {
        return None;
    }
    update.chat().map(|c| c.id)
}

pub async fn run_polling(cfg: Arc<Config>, media: Arc<dyn MediaOps>) -> anyhow::Result<()> {
    let mut bot = Bot::new(cfg.telegram_bot_token.clone());
    if let Some(url) = &cfg.telegram_api_url {
        bot = bot.set_api_url(reqwest::Url::parse(url)?);
        info!(%url, "using custom Bot API server");
    }

    match bot.get_me().await {
        Ok(me) => info!("video merge bot started: @{}", me.username()),
        Err(e) => warn!("get_me failed: {e}"),
    }
    info!(
        temp_dir = %cfg.temp_dir.display(),
        allowed_users = cfg.telegram_allowed_users.len(),
        size_limit = cfg.size_limit_bytes,
        "configuration loaded"
    );

    // Throttle outgoing calls; the adapter still retries once on 429 RetryAfter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let audit = Arc::new(AuditLogger::new(
        cfg.audit_log_path.clone(),
        cfg.audit_log_json,
    ));
    let orchestrator = Arc::new(
        Orchestrator::new(
            PipelinePolicy::from_config(&cfg),
            Arc::new(SessionRegistry::new()),
            ScratchStore::new(cfg.temp_dir.clone()),
            media,
            messenger.clone(),
        )
        .with_audit(AuditLogger::clone(&audit)),
    );

    let state = Arc::new(AppState {
        cfg,
        orchestrator,
        messenger,
        audit,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .distribution_function(distribution_key)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

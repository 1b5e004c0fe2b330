use std::sync::Arc;

use teloxide::prelude::*;

use tracing::{info, warn};
use vmb_core::{
    audit::AuditEvent,
    domain::{ChatId, UserId},
    messaging::types::{ButtonAction, EventKind},
    security::is_authorized,
};

use crate::router::AppState;

use super::dispatch;

pub async fn handle_callback(
    _bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let user_id = UserId(q.from.id.0 as i64);
    let chat_id = q.message.as_ref().map(|m| ChatId(m.chat.id.0));
    let data = q.data.clone().unwrap_or_default();

    // Auth check.
    if !is_authorized(Some(user_id), &state.cfg.telegram_allowed_users) {
        info!(user = user_id.0, "unauthorized callback");
        state.audit.record(AuditEvent::unauthorized(user_id.0));
        answer(&state, &cb_id, Some("Unauthorized")).await;
        return Ok(());
    }

    let (Some(chat), Some(action)) = (chat_id, ButtonAction::from_callback_data(&data)) else {
        answer(&state, &cb_id, Some("Unknown action")).await;
        return Ok(());
    };

    // Always answer callback query before the (possibly slow) handling.
    answer(&state, &cb_id, None).await;

    dispatch(&state, user_id, chat, EventKind::ButtonPressed(action)).await;
    Ok(())
}

async fn answer(state: &AppState, callback_id: &str, text: Option<&str>) {
    if let Err(e) = state.messenger.answer_callback_query(callback_id, text).await {
        warn!("failed to answer callback query: {e}");
    }
}

//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - validates auth
//! - turns the update into a core `IncomingEvent`
//! - hands it to the orchestrator
//!
//! Arrival order within a chat comes from the dispatcher's per-chat queue; see
//! [`runs_unqueued`] for the updates that skip it.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use tracing::{debug, info};
use vmb_core::{
    audit::AuditEvent,
    domain::{ChatId, UserId},
    messaging::types::{ButtonAction, EventKind, IncomingEvent},
    security::is_authorized,
};

use crate::router::AppState;
mod callback;
mod commands;
mod thumbnail;
mod upload;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if !is_authorized(user_id, &state.cfg.telegram_allowed_users) {
        if let Some(user) = user_id {
            info!(user = user.0, "unauthorized message");
            state.audit.record(AuditEvent::unauthorized(user.0));
        }
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }
    let Some(user) = user_id else {
        return Ok(());
    };
    let chat = ChatId(chat_id);

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(text, user, chat, state).await;
        }
        let _ = state
            .messenger
            .send_html(chat, "Send me videos to merge, or /help for the commands.")
            .await;
        return Ok(());
    }

    if let Some(file) = upload::remote_video(&msg) {
        dispatch(&state, user, chat, EventKind::FileUploaded(file)).await;
        return Ok(());
    }

    if let Some(file) = thumbnail::remote_image(&msg) {
        dispatch(&state, user, chat, EventKind::ImageUploaded(file)).await;
        return Ok(());
    }

    debug!(chat = chat_id, "ignoring unsupported message");
    let _ = state
        .messenger
        .send_html(
            chat,
            "That file type isn't supported. Send videos to merge, or an image as the thumbnail.",
        )
        .await;
    Ok(())
}

/// Read-only or stopping updates that must not wait behind a slow download:
/// `/cancel`, `/status` and the status button.
pub(crate) fn runs_unqueued(text: Option<&str>, callback_data: Option<&str>) -> bool {
    if let Some(text) = text {
        return commands::is_unqueued_command(text);
    }
    callback_data.and_then(ButtonAction::from_callback_data) == Some(ButtonAction::Status)
}

/// Hand an event to the orchestrator. Spawned jobs run detached.
async fn dispatch(state: &AppState, user: UserId, chat: ChatId, kind: EventKind) {
    let event = IncomingEvent { user, chat, kind };
    if let Some(job) = state.orchestrator.handle_event(event).await {
        debug!(finished = job.is_finished(), "job spawned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancel_and_status_skip_the_chat_queue() {
        assert!(runs_unqueued(Some("/cancel"), None));
        assert!(runs_unqueued(Some("/Status@video_merge_bot"), None));
        assert!(runs_unqueued(None, Some("check_status")));

        assert!(!runs_unqueued(Some("/start"), None));
        assert!(!runs_unqueued(Some("/merge"), None));
        assert!(!runs_unqueued(Some("cancel"), None));
        assert!(!runs_unqueued(None, Some("merge_videos")));
        assert!(!runs_unqueued(None, Some("skip_thumbnail")));
        assert!(!runs_unqueued(None, None));
    }
}

use std::sync::Arc;

use teloxide::prelude::*;

use vmb_core::{
    domain::{ChatId, UserId},
    formatting::{format_bytes, format_duration},
    messaging::types::{ButtonAction, EventKind},
};

use crate::router::AppState;

use super::dispatch;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// `/cancel` and `/status` are handled outside the per-chat queue.
pub(super) fn is_unqueued_command(text: &str) -> bool {
    text.trim_start().starts_with('/')
        && matches!(parse_command(text).0.as_str(), "cancel" | "status")
}

fn help_text(state: &AppState) -> String {
    format!(
        "🎬 <b>Video Merge Bot</b>\n\n\
         /start - begin a new merge session\n\
         /merge - merge the videos sent so far\n\
         /status - show progress\n\
         /cancel - stop and discard the session\n\
         /help - this message\n\n\
         Send videos in the order they should play. \
         Results over {} can be compressed or split into {} parts.",
        format_bytes(state.cfg.size_limit_bytes),
        format_duration(state.cfg.split_segment),
    )
}

pub async fn handle_command(
    text: &str,
    user: UserId,
    chat: ChatId,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let (cmd, _args) = parse_command(text);

    let kind = match cmd.as_str() {
        "start" => EventKind::SessionStart,
        "cancel" => EventKind::SessionCancel,
        "merge" => EventKind::ButtonPressed(ButtonAction::Merge),
        "status" => EventKind::ButtonPressed(ButtonAction::Status),
        "help" => {
            let _ = state.messenger.send_html(chat, &help_text(&state)).await;
            return Ok(());
        }
        _ => {
            let _ = state
                .messenger
                .send_html(chat, "Unknown command. Send /help for the list.")
                .await;
            return Ok(());
        }
    };

    dispatch(&state, user, chat, kind).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bot_suffix_and_args() {
        assert_eq!(
            parse_command("/Merge@video_merge_bot now"),
            ("merge".to_string(), "now".to_string())
        );
        assert_eq!(
            parse_command("  /start  "),
            ("start".to_string(), String::new())
        );
        assert_eq!(parse_command("/"), (String::new(), String::new()));
    }
}

use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{ChatAction, InlineKeyboard},
    Result,
};

/// Cross-messenger port.
///
/// Telegram is the only implementation today; the orchestrator depends on nothing
/// beyond this trait.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    /// Upload a local video. `keyboard` is attached to the same message when present.
    async fn send_video(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: &str,
        thumbnail: Option<&Path>,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef>;

    async fn send_document(&self, chat_id: ChatId, path: &Path, caption: &str)
        -> Result<MessageRef>;

    /// Fetch a messenger-hosted file into `dest` (which must not exist yet).
    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<()>;
}

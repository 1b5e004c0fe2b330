use crate::domain::{ChatId, RemoteFile, UserId};

/// Cross-messenger inbound event, already authorized and parsed by the adapter.
#[derive(Clone, Debug)]
pub struct IncomingEvent {
    pub user: UserId,
    pub chat: ChatId,
    pub kind: EventKind,
}

#[derive(Clone, Debug)]
pub enum EventKind {
    SessionStart,
    SessionCancel,
    FileUploaded(RemoteFile),
    ButtonPressed(ButtonAction),
    ImageUploaded(RemoteFile),
}

/// Buttons (and their command equivalents) the session flow reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ButtonAction {
    Merge,
    Status,
    Compress,
    Split,
    SkipThumbnail,
}

impl ButtonAction {
    pub const ALL: [ButtonAction; 5] = [
        ButtonAction::Merge,
        ButtonAction::Status,
        ButtonAction::Compress,
        ButtonAction::Split,
        ButtonAction::SkipThumbnail,
    ];

    pub fn callback_data(self) -> &'static str {
        match self {
            ButtonAction::Merge => "merge_videos",
            ButtonAction::Status => "check_status",
            ButtonAction::Compress => "compress",
            ButtonAction::Split => "split",
            ButtonAction::SkipThumbnail => "skip_thumbnail",
        }
    }

    pub fn from_callback_data(data: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.callback_data() == data.trim())
    }

    pub fn button(self) -> InlineButton {
        let label = match self {
            ButtonAction::Merge => "✅ Merge Videos",
            ButtonAction::Status => "📊 Status",
            ButtonAction::Compress => "🗜 Compress to fit",
            ButtonAction::Split => "✂ Split into parts",
            ButtonAction::SkipThumbnail => "⏭ Skip thumbnail",
        };
        InlineButton {
            label: label.to_string(),
            callback_data: self.callback_data().to_string(),
        }
    }
}

/// Outgoing "chat action" (upload indicator).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    UploadVideo,
    UploadDocument,
}

/// Inline keyboard, one button per row.
#[derive(Clone, Debug)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    pub fn actions(actions: &[ButtonAction]) -> Self {
        Self::new(actions.iter().map(|a| a.button()).collect())
    }

    pub fn callback_data(&self) -> Vec<&str> {
        self.buttons
            .iter()
            .map(|b| b.callback_data.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_round_trips() {
        for action in ButtonAction::ALL {
            assert_eq!(
                ButtonAction::from_callback_data(action.callback_data()),
                Some(action)
            );
        }
        assert_eq!(ButtonAction::from_callback_data("askuser:1:0"), None);
    }

    #[test]
    fn size_decision_keyboard_has_two_options() {
        let kb = InlineKeyboard::actions(&[ButtonAction::Compress, ButtonAction::Split]);
        assert_eq!(kb.callback_data(), vec!["compress", "split"]);
    }
}

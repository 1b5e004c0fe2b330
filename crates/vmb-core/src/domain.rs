/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// A file hosted by the messenger, not yet downloaded.
///
/// `file_name` and `mime_type` are user-controlled and only ever used for display
/// and for picking an extension from a fixed list; they never become part of a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFile {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

impl RemoteFile {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: None,
            mime_type: None,
            size: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("video")
    }

    /// Container extension for the local copy of an uploaded video.
    pub fn video_extension(&self) -> &'static str {
        const KNOWN: &[&str] = &["mp4", "mkv", "mov", "webm", "avi", "m4v", "ts"];

        let from_name = self
            .file_name
            .as_deref()
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        if let Some(ext) = from_name {
            if let Some(k) = KNOWN.iter().find(|k| **k == ext) {
                return k;
            }
        }

        match self.mime_type.as_deref() {
            Some("video/x-matroska") => "mkv",
            Some("video/quicktime") => "mov",
            Some("video/webm") => "webm",
            Some("video/x-msvideo") => "avi",
            _ => "mp4",
        }
    }

    /// Extension for a downloaded thumbnail source image.
    pub fn image_extension(&self) -> &'static str {
        match self.mime_type.as_deref() {
            Some("image/png") => "png",
            Some("image/webp") => "webp",
            _ => "jpg",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_comes_from_known_list_only() {
        let mut f = RemoteFile::new("abc");
        f.file_name = Some("holiday.MKV".to_string());
        assert_eq!(f.video_extension(), "mkv");

        f.file_name = Some("../../etc/passwd".to_string());
        assert_eq!(f.video_extension(), "mp4");

        f.file_name = None;
        f.mime_type = Some("video/quicktime".to_string());
        assert_eq!(f.video_extension(), "mov");
    }

    #[test]
    fn image_extension_defaults_to_jpg() {
        let mut f = RemoteFile::new("photo");
        assert_eq!(f.image_extension(), "jpg");
        f.mime_type = Some("image/png".to_string());
        assert_eq!(f.image_extension(), "png");
    }
}

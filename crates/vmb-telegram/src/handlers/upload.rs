use teloxide::types::Message;

use vmb_core::{
    domain::RemoteFile,
    media::command::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS},
};

/// What a generic document attachment looks like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum DocumentKind {
    Video,
    Image,
    Other,
}

pub(super) fn classify_document(file_name: Option<&str>, mime: Option<&str>) -> DocumentKind {
    if let Some(m) = mime {
        if m.starts_with("video/") {
            return DocumentKind::Video;
        }
        if m.starts_with("image/") {
            return DocumentKind::Image;
        }
    }
    let ext = file_name
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some(e) if VIDEO_EXTENSIONS.contains(&e) => DocumentKind::Video,
        Some(e) if IMAGE_EXTENSIONS.contains(&e) => DocumentKind::Image,
        _ => DocumentKind::Other,
    }
}

/// A video attachment, sent either as a video or as a video-typed document.
pub(super) fn remote_video(msg: &Message) -> Option<RemoteFile> {
    if let Some(video) = msg.video() {
        return Some(RemoteFile {
            file_id: video.file.id.clone(),
            file_name: video.file_name.clone(),
            mime_type: video.mime_type.as_ref().map(|m| m.to_string()),
            size: Some(u64::from(video.file.size)),
        });
    }

    let doc = msg.document()?;
    let mime = doc.mime_type.as_ref().map(|m| m.to_string());
    if classify_document(doc.file_name.as_deref(), mime.as_deref()) != DocumentKind::Video {
        return None;
    }
    Some(RemoteFile {
        file_id: doc.file.id.clone(),
        file_name: doc.file_name.clone(),
        mime_type: mime,
        size: Some(u64::from(doc.file.size)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_are_classified_by_mime_then_extension() {
        assert_eq!(
            classify_document(Some("clip.bin"), Some("video/mp4")),
            DocumentKind::Video
        );
        assert_eq!(classify_document(Some("clip.MOV"), None), DocumentKind::Video);
        assert_eq!(
            classify_document(Some("cover.png"), Some("application/octet-stream")),
            DocumentKind::Image
        );
        assert_eq!(
            classify_document(None, Some("image/jpeg")),
            DocumentKind::Image
        );
        assert_eq!(
            classify_document(Some("notes.txt"), Some("text/plain")),
            DocumentKind::Other
        );
        assert_eq!(classify_document(None, None), DocumentKind::Other);
    }
}

use teloxide::types::Message;

use vmb_core::domain::RemoteFile;

use super::upload::{classify_document, DocumentKind};

/// A thumbnail candidate: the largest size of a photo, or an image document.
pub(super) fn remote_image(msg: &Message) -> Option<RemoteFile> {
    if let Some(photos) = msg.photo() {
        let best = photos.last()?;
        return Some(RemoteFile {
            file_id: best.file.id.clone(),
            file_name: None,
            mime_type: Some("image/jpeg".to_string()),
            size: Some(u64::from(best.file.size)),
        });
    }

    let doc = msg.document()?;
    let mime = doc.mime_type.as_ref().map(|m| m.to_string());
    if classify_document(doc.file_name.as_deref(), mime.as_deref()) != DocumentKind::Image {
        return None;
    }
    Some(RemoteFile {
        file_id: doc.file.id.clone(),
        file_name: doc.file_name.clone(),
        mime_type: mime,
        size: Some(u64::from(doc.file.size)),
    })
}

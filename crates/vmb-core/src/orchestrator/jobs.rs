use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{JobKind, Orchestrator, Outcome};
use crate::{
    domain::ChatId,
    errors::Error,
    formatting::format_bytes,
    messaging::types::{ButtonAction, ChatAction, InlineKeyboard},
    session::{SessionHandle, Stage, Thumbnail},
};

const MANIFEST_NAME: &str = "concat.txt";
const MERGED_NAME: &str = "merged_output.mp4";
const COMPRESSED_NAME: &str = "compressed.mp4";
const PREVIEW_NAME: &str = "preview.mp4";
const THUMBNAIL_NAME: &str = "thumb.jpg";
const SPLIT_PREFIX: &str = "part";

/// Why a job stopped early.
#[derive(Debug)]
pub(super) enum JobStop {
    Cancelled,
    Failed(String),
    /// The session already ended elsewhere; nothing left to do.
    Ended,
}

impl From<Error> for JobStop {
    fn from(e: Error) -> Self {
        JobStop::Failed(e.to_string())
    }
}

/// `Ok(None)`: the job parked the session waiting for user input.
type Step = Result<Option<Outcome>, JobStop>;

impl Orchestrator {
    pub(super) async fn run_job(&self, handle: SessionHandle, kind: JobKind) {
        let result = match kind {
            JobKind::Merge => self.merge_job(&handle).await,
            JobKind::Compress => self.compress_job(&handle).await,
            JobKind::Split => self.split_job(&handle).await,
            JobKind::Finalize => self.finalize_job(&handle).await,
        };
        let outcome = match result {
            Ok(None) | Err(JobStop::Ended) => return,
            Ok(Some(outcome)) => outcome,
            Err(JobStop::Cancelled) => Outcome::Cancelled,
            Err(JobStop::Failed(reason)) => Outcome::Failed { reason },
        };
        self.finish(&handle, outcome).await;
    }

    /// Cancellation point. Optionally moves to `next` and records progress.
    async fn checkpoint(
        &self,
        handle: &SessionHandle,
        next: Option<Stage>,
        progress: &str,
    ) -> Result<(), JobStop> {
        let mut session = handle.lock().await;
        if session.stage().is_terminal() {
            return Err(JobStop::Ended);
        }
        if session.cancel_requested() {
            return Err(JobStop::Cancelled);
        }
        if let Some(next) = next {
            session.advance(next)?;
        }
        session.set_progress(progress);
        Ok(())
    }

    async fn scratch_path(&self, handle: &SessionHandle, name: &str) -> Result<PathBuf, JobStop> {
        let path = handle.lock().await.scratch().path_for(name)?;
        Ok(path)
    }

    async fn chat_of(&self, handle: &SessionHandle) -> ChatId {
        handle.lock().await.chat()
    }

    async fn merge_job(&self, handle: &SessionHandle) -> Step {
        self.checkpoint(handle, None, "Starting merge...").await?;
        let inputs = handle.lock().await.inputs().to_vec();
        let total = inputs.len();

        let mut normalized = Vec::with_capacity(total);
        for (i, input) in inputs.iter().enumerate() {
            self.checkpoint(
                handle,
                None,
                &format!("Normalizing video {}/{total}...", i + 1),
            )
            .await?;
            let out = self
                .scratch_path(handle, &format!("norm_{i:03}.mp4"))
                .await?;
            normalized.push(self.media.transcode(input, &out).await?);
        }

        self.checkpoint(handle, None, &format!("Concatenating {total} video(s)..."))
            .await?;
        let manifest = self.scratch_path(handle, MANIFEST_NAME).await?;
        let merged = self.scratch_path(handle, MERGED_NAME).await?;
        let merged = self
            .media
            .concatenate(&normalized, &manifest, &merged)
            .await?;

        handle.lock().await.set_merged_artifact(merged.clone());
        self.checkpoint(handle, Some(Stage::SizeCheck), "Checking output size...")
            .await?;
        let size = file_size(&merged).await?;
        let limit = self.policy.size_limit_bytes;
        info!(size, limit, "merged output ready");

        if size > limit {
            self.checkpoint(
                handle,
                Some(Stage::AwaitingSizeDecision { size }),
                "Waiting for your choice: compress or split.",
            )
            .await?;
            let chat = self.chat_of(handle).await;
            let text = format!(
                "The merged video is {}, over the {} limit. Choose an option:",
                format_bytes(size),
                format_bytes(limit)
            );
            self.messenger
                .send_inline_keyboard(
                    chat,
                    &text,
                    InlineKeyboard::actions(&[ButtonAction::Compress, ButtonAction::Split]),
                )
                .await?;
            return Ok(None);
        }

        self.deliver_preview(handle, merged).await
    }

    async fn compress_job(&self, handle: &SessionHandle) -> Step {
        self.checkpoint(handle, None, "Compressing...").await?;
        let merged = self.merged_artifact(handle).await?;
        let out = self.scratch_path(handle, COMPRESSED_NAME).await?;
        let limit = self.policy.size_limit_bytes;
        let compressed = self.media.compress(&merged, limit, &out).await?;

        let size = file_size(&compressed).await?;
        if size > limit {
            return Err(JobStop::Failed(format!(
                "compressed output is {size} bytes, still over the {limit} byte limit"
            )));
        }
        info!(size, "compressed output ready");
        self.deliver_preview(handle, compressed).await
    }

    async fn split_job(&self, handle: &SessionHandle) -> Step {
        self.checkpoint(handle, None, "Splitting video...").await?;
        let merged = self.merged_artifact(handle).await?;
        let out_dir = handle.lock().await.scratch().path().to_path_buf();
        let parts = self
            .media
            .split(&merged, self.policy.split_segment, &out_dir, SPLIT_PREFIX)
            .await?;
        if parts.is_empty() {
            return Err(JobStop::Failed("split produced no segments".to_string()));
        }

        let limit = self.policy.size_limit_bytes;
        for part in &parts {
            let size = file_size(part).await?;
            if size > limit {
                return Err(JobStop::Failed(format!(
                    "segment {} is {size} bytes, over the {limit} byte limit",
                    part.display()
                )));
            }
        }

        let chat = self.chat_of(handle).await;
        let total = parts.len();
        for (i, part) in parts.iter().enumerate() {
            self.checkpoint(handle, None, &format!("Sending part {}/{total}...", i + 1))
                .await?;
            self.chat_action(chat, ChatAction::UploadDocument).await;
            self.messenger
                .send_document(chat, part, &format!("Part {}", i + 1))
                .await?;
        }
        // A cancel that arrived during the last send still wins.
        self.checkpoint(handle, None, "All parts sent.").await?;

        Ok(Some(Outcome::Finalized {
            summary: format!("All {total} parts sent!"),
        }))
    }

    /// Send the preview clip and park the session waiting for a thumbnail.
    async fn deliver_preview(&self, handle: &SessionHandle, artifact: PathBuf) -> Step {
        self.checkpoint(
            handle,
            Some(Stage::Delivering {
                artifact: artifact.clone(),
            }),
            "Generating preview...",
        )
        .await?;
        let out = self.scratch_path(handle, PREVIEW_NAME).await?;
        let preview = self
            .media
            .make_preview(&artifact, self.policy.preview_duration, &out)
            .await?;

        self.checkpoint(handle, None, "Sending preview...").await?;
        let chat = self.chat_of(handle).await;
        let caption = format!(
            "Here is a {}s preview. Now send me a custom thumbnail image or skip it.",
            self.policy.preview_duration.as_secs()
        );
        self.chat_action(chat, ChatAction::UploadVideo).await;
        self.messenger
            .send_video(
                chat,
                &preview,
                &caption,
                None,
                Some(InlineKeyboard::actions(&[ButtonAction::SkipThumbnail])),
            )
            .await?;

        self.checkpoint(
            handle,
            Some(Stage::AwaitingThumbnail { artifact }),
            "Waiting for a thumbnail image (or skip).",
        )
        .await?;
        Ok(None)
    }

    async fn finalize_job(&self, handle: &SessionHandle) -> Step {
        self.checkpoint(handle, None, "Preparing thumbnail...").await?;
        let (artifact, choice) = {
            let session = handle.lock().await;
            let Stage::Finalizing { artifact } = session.stage() else {
                return Err(JobStop::Failed(format!(
                    "finalize started in stage {}",
                    session.stage().name()
                )));
            };
            (artifact.clone(), session.thumbnail().cloned())
        };

        let thumb_out = self.scratch_path(handle, THUMBNAIL_NAME).await?;
        let source = match &choice {
            Some(Thumbnail::Custom(path)) => path.clone(),
            Some(Thumbnail::Default) | None => match &self.policy.default_thumbnail {
                Some(path) if tokio::fs::try_exists(path).await.unwrap_or(false) => path.clone(),
                _ => artifact.clone(),
            },
        };
        let thumbnail = match self.media.render_thumbnail(&source, &thumb_out).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("thumbnail rendering failed, sending without one: {e}");
                None
            }
        };

        self.checkpoint(handle, None, "Uploading final video...").await?;
        let chat = self.chat_of(handle).await;
        self.chat_action(chat, ChatAction::UploadVideo).await;
        self.messenger
            .send_video(
                chat,
                &artifact,
                "🎬 Here is your merged video!",
                thumbnail.as_deref(),
                None,
            )
            .await?;
        self.checkpoint(handle, None, "Final video sent.").await?;

        Ok(Some(Outcome::Finalized {
            summary: "Done! Send /start to merge more videos.".to_string(),
        }))
    }

    async fn merged_artifact(&self, handle: &SessionHandle) -> Result<PathBuf, JobStop> {
        let merged = handle.lock().await.merged_artifact().cloned();
        merged.ok_or_else(|| JobStop::Failed("no merged artifact".to_string()))
    }

    async fn chat_action(&self, chat: ChatId, action: ChatAction) {
        if let Err(e) = self.messenger.send_chat_action(chat, action).await {
            warn!(chat = chat.0, "failed to send chat action: {e}");
        }
    }
}

async fn file_size(path: &Path) -> Result<u64, JobStop> {
    let meta = tokio::fs::metadata(path).await.map_err(Error::from)?;
    Ok(meta.len())
}

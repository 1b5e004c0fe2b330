//! Session flow: event handling, background jobs, teardown.
//!
//! Event handlers run on the adapter's task and only validate, mutate the session
//! briefly and spawn work. Media processing runs in spawned jobs that observe
//! cancellation at checkpoints between steps. Every terminal outcome goes through
//! [`Orchestrator::finish`], which releases scratch space and the registry entry
//! exactly once.

mod jobs;


use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::{sync::MutexGuard, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{
    audit::{AuditEvent, AuditLogger},
    config::Config,
    domain::{ChatId, RemoteFile, UserId},
    errors::SessionError,
    formatting::{escape_html, format_bytes},
    media::MediaOps,
    messaging::{
        port::MessagingPort,
        types::{ButtonAction, EventKind, IncomingEvent, InlineKeyboard},
    },
    registry::SessionRegistry,
    scratch::ScratchStore,
    session::{Session, SessionHandle, Stage, Thumbnail},
};

/// Fewest uploads a merge accepts.
pub const MIN_MERGE_INPUTS: usize = 1;

/// The part of [`Config`] the pipeline itself reads.
#[derive(Clone, Debug)]
pub struct PipelinePolicy {
    /// Outputs strictly larger than this need compress/split.
    pub size_limit_bytes: u64,
    pub preview_duration: Duration,
    pub split_segment: Duration,
    pub default_thumbnail: Option<PathBuf>,
}

impl PipelinePolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            size_limit_bytes: cfg.size_limit_bytes,
            preview_duration: cfg.preview_duration,
            split_segment: cfg.split_segment,
            default_thumbnail: cfg.default_thumbnail.clone(),
        }
    }
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            size_limit_bytes: 2000 * 1024 * 1024,
            preview_duration: Duration::from_secs(30),
            split_segment: Duration::from_secs(600),
            default_thumbnail: None,
        }
    }
}

/// Oversized-output choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeDecision {
    Compress,
    Split,
}

/// How a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Finalized { summary: String },
    Cancelled,
    Failed { reason: String },
}

impl Outcome {
    fn stage(&self) -> Stage {
        match self {
            Outcome::Finalized { .. } => Stage::Finalized,
            Outcome::Cancelled => Stage::Cancelled,
            Outcome::Failed { reason } => Stage::Failed {
                reason: reason.clone(),
            },
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Finalized { .. } => "finalized",
            Outcome::Cancelled => "cancelled",
            Outcome::Failed { .. } => "failed",
        }
    }

    /// The single message sent when the session ends. Failure reasons stay in the logs.
    fn user_message(&self) -> String {
        match self {
            Outcome::Finalized { summary } => format!("✅ {summary}"),
            Outcome::Cancelled => "🛑 Operation cancelled.".to_string(),
            Outcome::Failed { .. } => {
                "❌ Merging failed. Please send /start and try again.".to_string()
            }
        }
    }

    fn status_text(&self) -> &'static str {
        match self {
            Outcome::Finalized { .. } => {
                "✅ Your last session finished. Send /start to merge more videos."
            }
            Outcome::Cancelled => "🛑 Your last session was cancelled. Send /start to begin again.",
            Outcome::Failed { .. } => "❌ Your last session failed. Send /start to try again.",
        }
    }
}

/// Handle to a spawned job (and its supervisor). Dropping it detaches the job.
#[derive(Debug)]
pub struct JobHandle {
    inner: JoinHandle<()>,
}

impl JobHandle {
    /// Wait until the job, including its teardown, is done.
    pub async fn wait(self) {
        if let Err(e) = self.inner.await {
            warn!("job supervisor ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

#[derive(Clone, Copy, Debug)]
enum JobKind {
    Merge,
    Compress,
    Split,
    Finalize,
}

pub struct Orchestrator {
    policy: PipelinePolicy,
    registry: Arc<SessionRegistry>,
    scratch: ScratchStore,
    media: Arc<dyn MediaOps>,
    messenger: Arc<dyn MessagingPort>,
    audit: Option<AuditLogger>,
}

impl Orchestrator {
    pub fn new(
        policy: PipelinePolicy,
        registry: Arc<SessionRegistry>,
        scratch: ScratchStore,
        media: Arc<dyn MediaOps>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            policy,
            registry,
            scratch,
            media,
            messenger,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Dispatch one inbound event. Rejections are answered in the chat; the returned
    /// handle (if any) belongs to a job the event spawned.
    pub async fn handle_event(self: &Arc<Self>, event: IncomingEvent) -> Option<JobHandle> {
        let IncomingEvent { user, chat, kind } = event;
        let result = match kind {
            EventKind::SessionStart => self.start(user, chat).await.map(|_| None),
            EventKind::SessionCancel => self.cancel(user, chat).await.map(|_| None),
            EventKind::FileUploaded(file) => self.upload(user, chat, file).await.map(|_| None),
            EventKind::ImageUploaded(file) => {
                self.provide_thumbnail(user, chat, file).await.map(Some)
            }
            EventKind::ButtonPressed(action) => match action {
                ButtonAction::Merge => self.request_merge(user, chat).await.map(Some),
                ButtonAction::Status => {
                    let text = self.status(user).await;
                    self.reply(chat, &text).await;
                    Ok(None)
                }
                ButtonAction::Compress => self
                    .choose_size_option(user, chat, SizeDecision::Compress)
                    .await
                    .map(Some),
                ButtonAction::Split => self
                    .choose_size_option(user, chat, SizeDecision::Split)
                    .await
                    .map(Some),
                ButtonAction::SkipThumbnail => self.skip_thumbnail(user, chat).await.map(Some),
            },
        };

        match result {
            Ok(job) => job,
            Err(e) => {
                info!(user = user.0, "rejected: {e}");
                self.reply(chat, &escape_html(&e.user_message())).await;
                None
            }
        }
    }

    /// Open a session. An idle previous session is discarded; one with a running job
    /// is left alone.
    pub async fn start(&self, user: UserId, chat: ChatId) -> Result<(), SessionError> {
        if let Some(existing) = self.registry.get(user).await {
            let session = existing.lock().await;
            if session.stage().has_job() {
                return Err(SessionError::AlreadyInProgress);
            }
            self.teardown(session, Outcome::Cancelled).await;
        }

        let dir = self
            .scratch
            .allocate(user)
            .await
            .map_err(SessionError::Scratch)?;
        let handle = match self.registry.create(user, chat, dir).await {
            Ok(handle) => handle,
            Err(dir) => {
                self.scratch.release(&dir).await;
                return Err(SessionError::AlreadyActive);
            }
        };
        let id = handle.lock().await.id();

        info!(user = user.0, session = id, "session started");
        self.audit(AuditEvent::session_start(user.0, id));
        self.reply(
            chat,
            "Send me the videos you want to merge, in order. \
             When you're done, press <b>Merge Videos</b>.",
        )
        .await;
        Ok(())
    }

    /// Download an uploaded video into the session. Only accepted while collecting.
    pub async fn upload(
        &self,
        user: UserId,
        chat: ChatId,
        file: RemoteFile,
    ) -> Result<(), SessionError> {
        let handle = self.session_of(user).await?;
        let (id, dest) = {
            let mut session = handle.lock().await;
            require_stage(&session, "upload videos", |s| *s == Stage::Collecting)?;
            let name = session.reserve_file_name("input", file.video_extension());
            let dest = session
                .scratch()
                .path_for(&name)
                .map_err(SessionError::Scratch)?;
            (session.id(), dest)
        };

        self.messenger
            .download_file(&file.file_id, &dest)
            .await
            .map_err(SessionError::Download)?;

        // The session may have moved on while the download was in flight.
        let count = {
            let mut session = handle.lock().await;
            require_stage(&session, "upload videos", |s| *s == Stage::Collecting)?;
            session.push_input(dest)?
        };

        info!(user = user.0, session = id, inputs = count, "video saved");
        self.audit(AuditEvent::upload(user.0, id, file.display_name(), count));
        let text = format!(
            "Saved: <b>{}</b> ({count} so far)\nSend more, or press Merge when you're done.",
            escape_html(file.display_name())
        );
        self.send_keyboard(chat, &text, &[ButtonAction::Merge, ButtonAction::Status])
            .await;
        Ok(())
    }

    /// Freeze the inputs and start the merge job.
    pub async fn request_merge(
        self: &Arc<Self>,
        user: UserId,
        chat: ChatId,
    ) -> Result<JobHandle, SessionError> {
        let handle = self.session_of(user).await?;
        let (id, count) = {
            let mut session = handle.lock().await;
            require_stage(&session, "merge", |s| *s == Stage::Collecting)?;
            let have = session.inputs().len();
            if have < MIN_MERGE_INPUTS {
                return Err(SessionError::NotEnoughInputs {
                    required: MIN_MERGE_INPUTS,
                    have,
                });
            }
            session
                .advance(Stage::Merging)
                .map_err(|_| SessionError::AlreadyInProgress)?;
            session.set_progress("Starting merge...");
            (session.id(), have)
        };

        info!(user = user.0, session = id, inputs = count, "merge requested");
        self.audit(AuditEvent::merge_requested(user.0, id, count));
        self.send_keyboard(
            chat,
            &format!("Merging {count} video(s)... Use Status to check progress."),
            &[ButtonAction::Status],
        )
        .await;
        Ok(self.spawn_job(handle, JobKind::Merge))
    }

    /// Stop the session. A running job is asked to stop at its next checkpoint;
    /// otherwise the session ends immediately.
    pub async fn cancel(&self, user: UserId, chat: ChatId) -> Result<(), SessionError> {
        let handle = self.session_of(user).await?;
        let mut session = handle.lock().await;
        if session.stage().is_terminal() {
            return Err(SessionError::NoSession);
        }

        if session.stage().has_job() {
            session.request_cancel();
            session.set_progress("Cancelling after the current step...");
            let id = session.id();
            drop(session);
            info!(user = user.0, session = id, "cancel requested");
            self.reply(chat, "🛑 Cancelling... the current step will finish first.")
                .await;
            return Ok(());
        }

        self.teardown(session, Outcome::Cancelled).await;
        Ok(())
    }

    /// Status text for `user`; works with or without a live session.
    pub async fn status(&self, user: UserId) -> String {
        let Some(handle) = self.registry.get(user).await else {
            return match self.registry.last_outcome(user).await {
                Some(text) => text,
                None => "No active session. Send /start to begin.".to_string(),
            };
        };

        let session = handle.lock().await;
        let stage = session.stage();
        let mut text = format!(
            "🔄 <b>{}</b>\n\n{}",
            stage.describe(),
            escape_html(session.progress())
        );
        match stage {
            Stage::Collecting => {
                text.push_str(&format!("\nVideos received: {}", session.inputs().len()));
            }
            Stage::AwaitingSizeDecision { size } => {
                text.push_str(&format!(
                    "\nOutput size: {} (limit {})",
                    format_bytes(*size),
                    format_bytes(self.policy.size_limit_bytes)
                ));
            }
            _ => {}
        }
        text
    }

    /// Current stage, if the user has a session.
    pub async fn stage(&self, user: UserId) -> Option<Stage> {
        let handle = self.registry.get(user).await?;
        let stage = handle.lock().await.stage().clone();
        Some(stage)
    }

    /// Resolve an oversized output by compressing or splitting it.
    pub async fn choose_size_option(
        self: &Arc<Self>,
        user: UserId,
        chat: ChatId,
        decision: SizeDecision,
    ) -> Result<JobHandle, SessionError> {
        let handle = self.session_of(user).await?;
        let (next, kind, text) = match decision {
            SizeDecision::Compress => (Stage::Compressing, JobKind::Compress, "Compressing..."),
            SizeDecision::Split => (Stage::Splitting, JobKind::Split, "Splitting video..."),
        };
        {
            let mut session = handle.lock().await;
            require_stage(&session, "choose compress or split", |s| {
                matches!(s, Stage::AwaitingSizeDecision { .. })
            })?;
            session
                .advance(next)
                .map_err(|_| SessionError::AlreadyInProgress)?;
            session.set_progress(text);
        }

        info!(user = user.0, ?decision, "size decision");
        self.reply(chat, text).await;
        Ok(self.spawn_job(handle, kind))
    }

    /// Download a custom thumbnail and start final delivery.
    pub async fn provide_thumbnail(
        self: &Arc<Self>,
        user: UserId,
        chat: ChatId,
        file: RemoteFile,
    ) -> Result<JobHandle, SessionError> {
        let handle = self.session_of(user).await?;
        let dest = {
            let mut session = handle.lock().await;
            require_stage(&session, "set a thumbnail", is_awaiting_thumbnail)?;
            let name = session.reserve_file_name("thumb_source", file.image_extension());
            session
                .scratch()
                .path_for(&name)
                .map_err(SessionError::Scratch)?
        };

        self.messenger
            .download_file(&file.file_id, &dest)
            .await
            .map_err(SessionError::Download)?;

        self.begin_finalizing(&handle, Thumbnail::Custom(dest))
            .await?;
        self.reply(chat, "Thumbnail received. Sending the final video...")
            .await;
        Ok(self.spawn_job(handle, JobKind::Finalize))
    }

    /// Deliver with the default thumbnail.
    pub async fn skip_thumbnail(
        self: &Arc<Self>,
        user: UserId,
        chat: ChatId,
    ) -> Result<JobHandle, SessionError> {
        let handle = self.session_of(user).await?;
        self.begin_finalizing(&handle, Thumbnail::Default).await?;
        self.reply(
            chat,
            "You have skipped the thumbnail. Sending the final video...",
        )
        .await;
        Ok(self.spawn_job(handle, JobKind::Finalize))
    }

    async fn begin_finalizing(
        &self,
        handle: &SessionHandle,
        thumbnail: Thumbnail,
    ) -> Result<(), SessionError> {
        let mut session = handle.lock().await;
        require_stage(&session, "set a thumbnail", is_awaiting_thumbnail)?;
        let Stage::AwaitingThumbnail { artifact } = session.stage().clone() else {
            return Err(SessionError::AlreadyInProgress);
        };
        session
            .advance(Stage::Finalizing { artifact })
            .map_err(|_| SessionError::AlreadyInProgress)?;
        session.set_thumbnail(thumbnail);
        session.set_progress("Preparing the final video...");
        Ok(())
    }

    async fn session_of(&self, user: UserId) -> Result<SessionHandle, SessionError> {
        self.registry
            .get(user)
            .await
            .ok_or(SessionError::NoSession)
    }

    fn spawn_job(self: &Arc<Self>, handle: SessionHandle, kind: JobKind) -> JobHandle {
        let this = Arc::clone(self);
        let job_session = Arc::clone(&handle);
        let job = tokio::spawn(async move { this.run_job(job_session, kind).await });

        // A panicking job must still tear its session down.
        let this = Arc::clone(self);
        let supervisor = tokio::spawn(async move {
            if let Err(e) = job.await {
                error!(?kind, "job aborted: {e}");
                this.finish(
                    &handle,
                    Outcome::Failed {
                        reason: format!("job aborted: {e}"),
                    },
                )
                .await;
            }
        });
        JobHandle { inner: supervisor }
    }

    /// End the session with `outcome`. No-op (returns false) if it already ended.
    pub(crate) async fn finish(&self, handle: &SessionHandle, outcome: Outcome) -> bool {
        let session = handle.lock().await;
        self.teardown(session, outcome).await
    }

    async fn teardown(&self, mut session: MutexGuard<'_, Session>, outcome: Outcome) -> bool {
        let outcome = if session.stage().can_advance_to(&outcome.stage()) {
            outcome
        } else if session.stage().is_terminal() {
            return false;
        } else {
            Outcome::Failed {
                reason: format!(
                    "{} reached from {}",
                    outcome.label(),
                    session.stage().name()
                ),
            }
        };
        if !session.terminate(outcome.stage()) {
            return false;
        }
        session.set_progress(outcome.status_text());

        let (owner, chat, id) = (session.owner(), session.chat(), session.id());
        self.scratch.release(session.scratch()).await;
        self.registry.remove(owner, id).await;
        self.registry
            .record_outcome(owner, outcome.status_text())
            .await;
        drop(session);

        match &outcome {
            Outcome::Failed { reason } => {
                error!(user = owner.0, session = id, "session failed: {reason}")
            }
            other => info!(user = owner.0, session = id, outcome = other.label(), "session ended"),
        }
        let detail = match &outcome {
            Outcome::Failed { reason } => Some(reason.as_str()),
            _ => None,
        };
        self.audit(AuditEvent::outcome(owner.0, id, outcome.label(), detail));
        self.reply(chat, &escape_html(&outcome.user_message())).await;
        true
    }

    async fn reply(&self, chat: ChatId, html: &str) {
        if let Err(e) = self.messenger.send_html(chat, html).await {
            warn!(chat = chat.0, "failed to send message: {e}");
        }
    }

    async fn send_keyboard(&self, chat: ChatId, text: &str, actions: &[ButtonAction]) {
        let keyboard = InlineKeyboard::actions(actions);
        if let Err(e) = self
            .messenger
            .send_inline_keyboard(chat, text, keyboard)
            .await
        {
            warn!(chat = chat.0, "failed to send keyboard: {e}");
        }
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }
}

fn is_awaiting_thumbnail(stage: &Stage) -> bool {
    matches!(stage, Stage::AwaitingThumbnail { .. })
}

/// Reject unless `allowed(stage)`; a running job reports as "already in progress".
fn require_stage(
    session: &Session,
    action: &'static str,
    allowed: impl Fn(&Stage) -> bool,
) -> Result<(), SessionError> {
    let stage = session.stage();
    if allowed(stage) {
        return Ok(());
    }
    if stage.has_job() {
        return Err(SessionError::AlreadyInProgress);
    }
    if stage.is_terminal() {
        return Err(SessionError::NoSession);
    }
    Err(SessionError::WrongStage {
        action,
        stage: stage.describe(),
    })
}

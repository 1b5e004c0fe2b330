//! Per-user session aggregate and its lifecycle stages.

use std::{path::PathBuf, sync::Arc};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChatId, UserId},
    errors::{Error, SessionError},
    scratch::ScratchDir,
    Result,
};

/// Shared handle; the mutex is the per-session single-writer gate.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Position in the job lifecycle.
///
/// Stages that need an artifact carry it, so e.g. "awaiting a thumbnail" without a
/// finished merge cannot be represented.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Collecting,
    Merging,
    SizeCheck,
    AwaitingSizeDecision { size: u64 },
    Compressing,
    Splitting,
    Delivering { artifact: PathBuf },
    AwaitingThumbnail { artifact: PathBuf },
    Finalizing { artifact: PathBuf },
    Finalized,
    Cancelled,
    Failed { reason: String },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Collecting => "collecting",
            Stage::Merging => "merging",
            Stage::SizeCheck => "size_check",
            Stage::AwaitingSizeDecision { .. } => "awaiting_size_decision",
            Stage::Compressing => "compressing",
            Stage::Splitting => "splitting",
            Stage::Delivering { .. } => "delivering",
            Stage::AwaitingThumbnail { .. } => "awaiting_thumbnail",
            Stage::Finalizing { .. } => "finalizing",
            Stage::Finalized => "finalized",
            Stage::Cancelled => "cancelled",
            Stage::Failed { .. } => "failed",
        }
    }

    /// Short user-facing label.
    pub fn describe(&self) -> &'static str {
        match self {
            Stage::Collecting => "collecting uploads",
            Stage::Merging => "merging in progress",
            Stage::SizeCheck => "checking output size",
            Stage::AwaitingSizeDecision { .. } => "waiting for compress/split choice",
            Stage::Compressing => "compressing",
            Stage::Splitting => "splitting",
            Stage::Delivering { .. } => "preparing preview",
            Stage::AwaitingThumbnail { .. } => "waiting for a thumbnail",
            Stage::Finalizing { .. } => "sending the final video",
            Stage::Finalized => "finished",
            Stage::Cancelled => "cancelled",
            Stage::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Finalized | Stage::Cancelled | Stage::Failed { .. }
        )
    }

    /// Stages during which a background job owns the pipeline.
    pub fn has_job(&self) -> bool {
        matches!(
            self,
            Stage::Merging
                | Stage::SizeCheck
                | Stage::Compressing
                | Stage::Splitting
                | Stage::Delivering { .. }
                | Stage::Finalizing { .. }
        )
    }

    /// Forward-only transition table. Any non-terminal stage may fail or be cancelled.
    pub fn can_advance_to(&self, next: &Stage) -> bool {
        use Stage::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Cancelled)
                | (_, Failed { .. })
                | (Collecting, Merging)
                | (Merging, SizeCheck)
                | (SizeCheck, Delivering { .. })
                | (SizeCheck, AwaitingSizeDecision { .. })
                | (AwaitingSizeDecision { .. }, Compressing)
                | (AwaitingSizeDecision { .. }, Splitting)
                | (Compressing, Delivering { .. })
                | (Splitting, Finalized)
                | (Delivering { .. }, AwaitingThumbnail { .. })
                | (AwaitingThumbnail { .. }, Finalizing { .. })
                | (Finalizing { .. }, Finalized)
        )
    }
}

/// Thumbnail picked for the final delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Thumbnail {
    Custom(PathBuf),
    Default,
}

#[derive(Debug)]
pub struct Session {
    id: u64,
    owner: UserId,
    chat: ChatId,
    inputs: Vec<PathBuf>,
    scratch: ScratchDir,
    stage: Stage,
    progress: String,
    cancel: CancellationToken,
    thumbnail: Option<Thumbnail>,
    merged_artifact: Option<PathBuf>,
    next_file: usize,
}

impl Session {
    pub fn new(id: u64, owner: UserId, chat: ChatId, scratch: ScratchDir) -> Self {
        Self {
            id,
            owner,
            chat,
            inputs: Vec::new(),
            scratch,
            stage: Stage::Collecting,
            progress: "Waiting for uploads.".to_string(),
            cancel: CancellationToken::new(),
            thumbnail: None,
            merged_artifact: None,
            next_file: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn chat(&self) -> ChatId {
        self.chat
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn progress(&self) -> &str {
        &self.progress
    }

    pub fn thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnail.as_ref()
    }

    pub fn merged_artifact(&self) -> Option<&PathBuf> {
        self.merged_artifact.as_ref()
    }

    /// Unique scratch file name (`<stem>_<nnn>.<ext>`) for the next download.
    pub fn reserve_file_name(&mut self, stem: &str, ext: &str) -> String {
        let n = self.next_file;
        self.next_file += 1;
        format!("{stem}_{n:03}.{ext}")
    }

    /// Append an uploaded file; only while collecting. Returns the new input count.
    pub fn push_input(&mut self, path: PathBuf) -> std::result::Result<usize, SessionError> {
        if self.stage != Stage::Collecting {
            return Err(SessionError::WrongStage {
                action: "add videos",
                stage: self.stage.describe(),
            });
        }
        self.inputs.push(path);
        self.progress = format!("{} video(s) received.", self.inputs.len());
        Ok(self.inputs.len())
    }

    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_advance_to(&next) {
            return Err(Error::InvalidTransition {
                from: self.stage.name(),
                to: next.name(),
            });
        }
        self.stage = next;
        Ok(())
    }

    /// Move into a terminal stage. Returns false if the session already ended.
    pub(crate) fn terminate(&mut self, terminal: Stage) -> bool {
        debug_assert!(terminal.is_terminal());
        if self.stage.is_terminal() {
            return false;
        }
        self.stage = terminal;
        self.cancel.cancel();
        true
    }

    pub fn set_progress(&mut self, text: impl Into<String>) {
        self.progress = text.into();
    }

    pub fn set_merged_artifact(&mut self, path: PathBuf) {
        self.merged_artifact = Some(path);
    }

    pub fn set_thumbnail(&mut self, thumbnail: Thumbnail) {
        self.thumbnail = Some(thumbnail);
    }

    /// Advisory: observed by the running job at its next checkpoint.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::ScratchStore;

    async fn session() -> (tempfile::TempDir, Session) {
        let root = tempfile::tempdir().unwrap();
        let dir = ScratchStore::new(root.path())
            .allocate(UserId(1))
            .await
            .unwrap();
        (root, Session::new(1, UserId(1), ChatId(1), dir))
    }

    fn artifact() -> PathBuf {
        PathBuf::from("/tmp/merged_output.mp4")
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [
            Stage::Collecting,
            Stage::Merging,
            Stage::SizeCheck,
            Stage::AwaitingSizeDecision { size: 10 },
            Stage::Compressing,
            Stage::Delivering {
                artifact: artifact(),
            },
            Stage::AwaitingThumbnail {
                artifact: artifact(),
            },
            Stage::Finalizing {
                artifact: artifact(),
            },
            Stage::Finalized,
        ];
        for w in path.windows(2) {
            assert!(w[0].can_advance_to(&w[1]), "{:?} -> {:?}", w[0], w[1]);
        }
        assert!(Stage::Splitting.can_advance_to(&Stage::Finalized));
        assert!(Stage::SizeCheck.can_advance_to(&Stage::Delivering {
            artifact: artifact()
        }));
    }

    #[test]
    fn stages_never_regress_or_skip() {
        assert!(!Stage::Merging.can_advance_to(&Stage::Collecting));
        assert!(!Stage::Collecting.can_advance_to(&Stage::SizeCheck));
        assert!(!Stage::Collecting.can_advance_to(&Stage::Finalized));
        assert!(!Stage::Delivering {
            artifact: artifact()
        }
        .can_advance_to(&Stage::Finalized));
        assert!(!Stage::AwaitingThumbnail {
            artifact: artifact()
        }
        .can_advance_to(&Stage::Merging));
    }

    #[test]
    fn terminal_stages_are_absorbing() {
        for terminal in [
            Stage::Finalized,
            Stage::Cancelled,
            Stage::Failed {
                reason: "x".to_string(),
            },
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_advance_to(&Stage::Cancelled));
            assert!(!terminal.can_advance_to(&Stage::Collecting));
        }
        assert!(Stage::Compressing.can_advance_to(&Stage::Cancelled));
        assert!(Stage::Collecting.can_advance_to(&Stage::Failed {
            reason: "x".to_string()
        }));
    }

    #[tokio::test]
    async fn inputs_are_frozen_once_merging() {
        let (_root, mut s) = session().await;
        assert_eq!(s.push_input(PathBuf::from("a.mp4")).unwrap(), 1);
        assert_eq!(s.push_input(PathBuf::from("b.mp4")).unwrap(), 2);

        s.advance(Stage::Merging).unwrap();
        assert!(matches!(
            s.push_input(PathBuf::from("c.mp4")),
            Err(SessionError::WrongStage { .. })
        ));
        assert_eq!(
            s.inputs(),
            &[PathBuf::from("a.mp4"), PathBuf::from("b.mp4")]
        );
    }

    #[tokio::test]
    async fn illegal_advance_is_rejected_without_change() {
        let (_root, mut s) = session().await;
        let err = s.advance(Stage::Finalized).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(s.stage(), &Stage::Collecting);
    }

    #[tokio::test]
    async fn terminate_only_once() {
        let (_root, mut s) = session().await;
        assert!(s.terminate(Stage::Cancelled));
        assert!(s.cancel_requested());
        assert!(!s.terminate(Stage::Failed {
            reason: "late".to_string()
        }));
        assert_eq!(s.stage(), &Stage::Cancelled);
    }

    #[tokio::test]
    async fn reserved_names_are_unique() {
        let (_root, mut s) = session().await;
        assert_eq!(s.reserve_file_name("input", "mp4"), "input_000.mp4");
        assert_eq!(s.reserve_file_name("thumb_source", "jpg"), "thumb_source_001.jpg");
        assert_eq!(s.reserve_file_name("input", "mkv"), "input_002.mkv");
    }
}

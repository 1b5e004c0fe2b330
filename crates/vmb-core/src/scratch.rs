//! Per-session scratch directories.
//!
//! Every file a session produces lives under its directory, so `release` is the only
//! place disk cleanup happens.

use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{domain::UserId, errors::Error, Result};

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Handle to one session's directory. Owned by exactly one session.
#[derive(Debug, PartialEq, Eq)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside this directory. `name` must be a plain file name.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.path.join(name)),
            _ => Err(Error::InvalidPath {
                path: PathBuf::from(name),
                reason: "scratch names must be plain file names".to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScratchStore {
    root: PathBuf,
}

impl ScratchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn allocate(&self, owner: UserId) -> Result<ScratchDir> {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = self.root.join(format!("session-{}-{ts}-{n}", owner.0));

        tokio::fs::create_dir_all(&self.root).await?;
        // `create_dir` (not `_all`) so a name collision is an error, never a shared dir.
        tokio::fs::create_dir(&path).await?;
        tracing::debug!(dir = %path.display(), "allocated scratch dir");
        Ok(ScratchDir { path })
    }

    /// Remove the directory and everything under it.
    ///
    /// Idempotent: a missing directory is success. Other failures are logged and
    /// swallowed; a leaked directory must never take the session flow down with it.
    pub async fn release(&self, dir: &ScratchDir) {
        match tokio::fs::remove_dir_all(&dir.path).await {
            Ok(()) => tracing::debug!(dir = %dir.path.display(), "released scratch dir"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %dir.path.display(), "failed to remove scratch dir: {e}")
            }
        }
    }
}

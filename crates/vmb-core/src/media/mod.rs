//! Media operations façade.
//!
//! The orchestrator only sees `MediaOps`; the ffmpeg adapter crate implements it by
//! running the invocations planned in [`command`].

pub mod command;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;

use crate::Result;

/// Port for the external media engine.
///
/// Each call awaits the external process to completion and either returns the
/// produced artifact(s) or `Error::Media`. Outputs are written to caller-supplied
/// paths. Calls are never aborted midway by the orchestrator.
#[async_trait]
pub trait MediaOps: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<PathBuf>;

    /// Stream-copy `inputs` (already normalized) in order, via a manifest at `manifest`.
    async fn concatenate(&self, inputs: &[PathBuf], manifest: &Path, output: &Path)
        -> Result<PathBuf>;

    async fn make_preview(&self, input: &Path, length: Duration, output: &Path)
        -> Result<PathBuf>;

    /// Re-encode so the result does not exceed `size_limit` bytes.
    async fn compress(&self, input: &Path, size_limit: u64, output: &Path) -> Result<PathBuf>;

    /// Segments in playback order.
    async fn split(
        &self,
        input: &Path,
        segment: Duration,
        out_dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>>;

    async fn render_thumbnail(&self, source: &Path, output: &Path) -> Result<PathBuf>;
}

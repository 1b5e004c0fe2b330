//! ffmpeg adapter.
//!
//! Runs the invocations planned by `vmb_core::media::command` as child processes and
//! checks that each one left a non-empty output behind.

use async_trait::async_trait;

use std::{
    collections::VecDeque,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, Command},
    sync::Mutex,
};
use tracing::{debug, info, warn};
use vmb_core::{
    config::Config,
    errors::Error,
    media::{
        command::{
            compress_video_kbps, concat_manifest, parse_probe_duration, CliInvocation,
            MediaCommands,
        },
        MediaOps,
    },
    Result,
};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

const COMPRESS_AUDIO_KBPS: u32 = 128;

#[derive(Clone, Debug)]
pub struct FfmpegEngine {
    commands: MediaCommands,
    timeout: Duration,
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            if let Some(front) = self.lines.pop_front() {
                self.bytes = self.bytes.saturating_sub(front.len() + 1);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

impl FfmpegEngine {
    pub fn new(
        ffmpeg: impl Into<PathBuf>,
        ffprobe: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            commands: MediaCommands::new(ffmpeg, ffprobe),
            timeout,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.ffmpeg_path, &cfg.ffprobe_path, cfg.media_timeout)
    }

    /// Run to completion and return stdout. Non-zero exit carries the stderr tail.
    async fn run(&self, op: &'static str, inv: CliInvocation) -> Result<String> {
        let started = Instant::now();
        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::media(
                op,
                format!("failed to start {}: {e}", inv.program.display()),
            )
        })?;

        let stdout = child.stdout.take();
        let stderr_tail: Arc<Mutex<StderrTail>> = Arc::new(Mutex::new(StderrTail::default()));

        // Drain stderr in background to avoid blocking on a full pipe.
        let drain = child.stderr.take().map(|stderr| {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    tail.lock().await.push_line(line);
                }
            })
        });

        let waited = tokio::time::timeout(self.timeout, async {
            let mut out = String::new();
            if let Some(mut stdout) = stdout {
                stdout.read_to_string(&mut out).await?;
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out))
        })
        .await;

        let (status, out) = match waited {
            Ok(res) => res.map_err(|e| Error::media(op, format!("i/o error: {e}")))?,
            Err(_) => {
                kill_child(&mut child).await;
                return Err(Error::media(
                    op,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        if let Some(drain) = drain {
            let _ = drain.await;
        }

        debug!(
            op,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "media command finished"
        );

        if !status.success() {
            let stderr = stderr_tail.lock().await.snapshot();
            if !stderr.trim().is_empty() {
                return Err(Error::media(
                    op,
                    format!("exited with status {status}\nstderr (tail):\n{stderr}"),
                ));
            }
            return Err(Error::media(op, format!("exited with status {status}")));
        }
        Ok(out)
    }

    async fn run_to(&self, op: &'static str, inv: CliInvocation, output: &Path) -> Result<PathBuf> {
        self.run(op, inv).await?;
        ensure_output(op, output).await?;
        Ok(output.to_path_buf())
    }

    async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let inv = match self.commands.probe_duration(input) {
            Ok(inv) => inv,
            Err(e) => {
                warn!("cannot probe {}: {e}", input.display());
                return None;
            }
        };
        match self.run("probe", inv).await {
            Ok(out) => parse_probe_duration(&out),
            Err(e) => {
                warn!("ffprobe failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl MediaOps for FfmpegEngine {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<PathBuf> {
        let inv = self.commands.transcode(input, output)?;
        self.run_to("transcode", inv, output).await
    }

    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        manifest: &Path,
        output: &Path,
    ) -> Result<PathBuf> {
        if inputs.is_empty() {
            return Err(Error::media("concatenate", "no inputs"));
        }
        tokio::fs::write(manifest, concat_manifest(inputs)).await?;
        let inv = self.commands.concatenate(manifest, output)?;
        self.run_to("concatenate", inv, output).await
    }

    async fn make_preview(&self, input: &Path, length: Duration, output: &Path) -> Result<PathBuf> {
        let inv = self.commands.preview(input, length, output)?;
        self.run_to("make_preview", inv, output).await
    }

    async fn compress(&self, input: &Path, size_limit: u64, output: &Path) -> Result<PathBuf> {
        let duration = self.probe_duration(input).await;
        let video_kbps = compress_video_kbps(size_limit, duration, COMPRESS_AUDIO_KBPS);
        info!(?duration, video_kbps, size_limit, "compressing");

        let inv = self
            .commands
            .compress(input, video_kbps, COMPRESS_AUDIO_KBPS, size_limit, output)?;
        self.run_to("compress", inv, output).await
    }

    async fn split(
        &self,
        input: &Path,
        segment: Duration,
        out_dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>> {
        let inv = self.commands.split(input, segment, out_dir, prefix)?;
        self.run("split", inv).await?;

        let parts = list_segments(out_dir, prefix).await?;
        if parts.is_empty() {
            return Err(Error::media("split", "produced no segments"));
        }
        for part in &parts {
            ensure_output("split", part).await?;
        }
        Ok(parts)
    }

    async fn render_thumbnail(&self, source: &Path, output: &Path) -> Result<PathBuf> {
        let inv = self.commands.thumbnail(source, output)?;
        self.run_to("render_thumbnail", inv, output).await
    }
}

/// Best-effort kill + reap.
async fn kill_child(child: &mut Child) {
    // If it's already exited, `try_wait` reaps it.
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    match child.kill().await {
        Ok(()) => {}
        Err(e) => warn!("failed to kill media process: {e}"),
    }
}

async fn ensure_output(op: &'static str, output: &Path) -> Result<()> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(Error::media(
            op,
            format!("{} is empty", output.display()),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::media(
            op,
            format!("{} was not produced", output.display()),
        )),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Segments written by the split invocation, in playback order.
async fn list_segments(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if is_segment_name(&name.to_string_lossy(), prefix) {
            parts.push(entry.path());
        }
    }
    parts.sort();
    Ok(parts)
}

fn is_segment_name(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(".mp4"))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(timeout: Duration) -> FfmpegEngine {
        FfmpegEngine::new("ffmpeg", "ffprobe", timeout)
    }

    fn shell(script: &str) -> CliInvocation {
        CliInvocation {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let mut tail = StderrTail::default();
        for i in 0..(STDERR_TAIL_MAX_LINES + 5) {
            tail.push_line(format!("line {i}"));
        }
        assert_eq!(tail.lines.len(), STDERR_TAIL_MAX_LINES);
        assert!(tail.snapshot().starts_with("line 5\n"));
    }

    #[test]
    fn segment_names() {
        assert!(is_segment_name("part000.mp4", "part"));
        assert!(is_segment_name("part1234.mp4", "part"));
        assert!(!is_segment_name("part.mp4", "part"));
        assert!(!is_segment_name("partial.mp4", "part"));
        assert!(!is_segment_name("part000.mkv", "part"));
        assert!(!is_segment_name("merged_output.mp4", "part"));
    }

    #[tokio::test]
    async fn segments_are_listed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["part002.mp4", "part000.mp4", "merged_output.mp4", "part001.mp4"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let parts = list_segments(dir.path(), "part").await.unwrap();
        let names: Vec<_> = parts
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["part000.mp4", "part001.mp4", "part002.mp4"]);
    }

    #[tokio::test]
    async fn empty_or_missing_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();

        let err = ensure_output("transcode", &empty).await.unwrap_err();
        assert!(err.to_string().contains("is empty"));
        let err = ensure_output("transcode", &dir.path().join("missing.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("was not produced"));
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let inv = CliInvocation {
            program: PathBuf::from("/nonexistent/ffmpeg"),
            args: vec![],
        };
        let err = engine(Duration::from_secs(5))
            .run("transcode", inv)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("transcode failed: failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reports_stderr_tail() {
        let err = engine(Duration::from_secs(5))
            .run("concatenate", shell("echo 'bad manifest' >&2; exit 3"))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("concatenate failed: exited with status"));
        assert!(msg.contains("bad manifest"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_is_returned() {
        let out = engine(Duration::from_secs(5))
            .run("probe", shell("echo 12.5"))
            .await
            .unwrap();
        assert_eq!(parse_probe_duration(&out), Some(12.5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_process_times_out() {
        let err = engine(Duration::from_millis(100))
            .run("compress", shell("sleep 5"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}

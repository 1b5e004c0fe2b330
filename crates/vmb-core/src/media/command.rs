//! Typed ffmpeg/ffprobe command construction.
//!
//! Argument lists are built from typed values only; nothing here goes through a shell.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm", "avi", "m4v", "ts"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

const MANIFEST_EXTENSIONS: &[&str] = &["txt"];
const OUTPUT_VIDEO_EXTENSIONS: &[&str] = &["mp4"];
const OUTPUT_IMAGE_EXTENSIONS: &[&str] = &["jpg"];

/// Width cap for Telegram thumbnails.
pub const THUMBNAIL_MAX_WIDTH: u32 = 320;

/// A concrete process invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CliInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Builder for a single-input ffmpeg command.
#[derive(Clone, Debug)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: String,
    input_args: Vec<String>,
    output_args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_string_lossy().to_string(),
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Seek before decoding (input option).
    pub fn seek(self, d: Duration) -> Self {
        self.input_arg("-ss").input_arg(seconds(d))
    }

    /// Read the input as an ffmpeg concat manifest.
    pub fn concat_demuxer(self) -> Self {
        self.input_arg("-f")
            .input_arg("concat")
            .input_arg("-safe")
            .input_arg("0")
    }

    /// Limit output duration.
    pub fn duration(self, d: Duration) -> Self {
        self.output_arg("-t").output_arg(seconds(d))
    }

    pub fn video_codec(self, codec: &str) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: &str) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn preset(self, preset: &str) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn video_bitrate_kbps(self, kbps: u32) -> Self {
        self.output_args([
            "-b:v".to_string(),
            format!("{kbps}k"),
            "-maxrate".to_string(),
            format!("{kbps}k"),
            "-bufsize".to_string(),
            format!("{}k", kbps.saturating_mul(2)),
        ])
    }

    pub fn audio_bitrate_kbps(self, kbps: u32) -> Self {
        self.output_arg("-b:a").output_arg(format!("{kbps}k"))
    }

    /// Hard output size ceiling in bytes.
    pub fn max_file_size(self, bytes: u64) -> Self {
        self.output_arg("-fs").output_arg(bytes.to_string())
    }

    /// Copy all streams without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-map").output_arg("0").output_arg("-c").output_arg("copy")
    }

    /// Web-friendly MP4 (moov atom first).
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-v".to_string(),
            "error".to_string(),
        ];
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.clone());
        args
    }

    pub fn into_invocation(self, program: &Path) -> CliInvocation {
        CliInvocation {
            program: program.to_path_buf(),
            args: self.build_args(),
        }
    }
}

/// Validated command plans for each media operation.
#[derive(Clone, Debug)]
pub struct MediaCommands {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl MediaCommands {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Normalize to H.264 + AAC in MP4 so inputs can be stream-copied together.
    pub fn transcode(&self, input: &Path, output: &Path) -> Result<CliInvocation> {
        validate_input(input, VIDEO_EXTENSIONS)?;
        validate_output(output, OUTPUT_VIDEO_EXTENSIONS)?;
        Ok(FfmpegCommand::new(input, output)
            .video_codec("libx264")
            .preset("fast")
            .crf(23)
            .output_args(["-pix_fmt", "yuv420p"])
            .audio_codec("aac")
            .audio_bitrate_kbps(128)
            .output_args(["-ar", "48000", "-ac", "2"])
            .faststart()
            .into_invocation(&self.ffmpeg))
    }

    pub fn concatenate(&self, manifest: &Path, output: &Path) -> Result<CliInvocation> {
        validate_input(manifest, MANIFEST_EXTENSIONS)?;
        validate_output(output, OUTPUT_VIDEO_EXTENSIONS)?;
        Ok(FfmpegCommand::new(manifest, output)
            .concat_demuxer()
            .stream_copy()
            .faststart()
            .into_invocation(&self.ffmpeg))
    }

    pub fn preview(&self, input: &Path, length: Duration, output: &Path) -> Result<CliInvocation> {
        validate_input(input, VIDEO_EXTENSIONS)?;
        validate_output(output, OUTPUT_VIDEO_EXTENSIONS)?;
        if length.is_zero() {
            return Err(Error::media("make_preview", "preview length must be positive"));
        }
        Ok(FfmpegCommand::new(input, output)
            .duration(length)
            .video_codec("libx264")
            .preset("veryfast")
            .crf(28)
            .audio_codec("aac")
            .faststart()
            .into_invocation(&self.ffmpeg))
    }

    pub fn compress(
        &self,
        input: &Path,
        video_kbps: u32,
        audio_kbps: u32,
        size_limit: u64,
        output: &Path,
    ) -> Result<CliInvocation> {
        validate_input(input, VIDEO_EXTENSIONS)?;
        validate_output(output, OUTPUT_VIDEO_EXTENSIONS)?;
        Ok(FfmpegCommand::new(input, output)
            .video_codec("libx264")
            .preset("fast")
            .video_bitrate_kbps(video_kbps)
            .audio_codec("aac")
            .audio_bitrate_kbps(audio_kbps)
            .max_file_size(size_limit)
            .faststart()
            .into_invocation(&self.ffmpeg))
    }

    /// Segments land in `out_dir` as `<prefix>000.mp4`, `<prefix>001.mp4`, ...
    pub fn split(
        &self,
        input: &Path,
        segment: Duration,
        out_dir: &Path,
        prefix: &str,
    ) -> Result<CliInvocation> {
        validate_input(input, VIDEO_EXTENSIONS)?;
        if !out_dir.is_dir() {
            return Err(Error::InvalidPath {
                path: out_dir.to_path_buf(),
                reason: "segment directory does not exist".to_string(),
            });
        }
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidPath {
                path: PathBuf::from(prefix),
                reason: "segment prefix must be [A-Za-z0-9_-]+".to_string(),
            });
        }
        if segment.is_zero() {
            return Err(Error::media("split", "segment duration must be positive"));
        }

        let pattern = out_dir.join(format!("{prefix}%03d.mp4"));
        Ok(FfmpegCommand::new(input, pattern)
            .stream_copy()
            .output_args([
                "-f".to_string(),
                "segment".to_string(),
                "-segment_time".to_string(),
                seconds(segment),
                "-reset_timestamps".to_string(),
                "1".to_string(),
            ])
            .into_invocation(&self.ffmpeg))
    }

    /// JPEG thumbnail: rescale an image, or grab a frame one second into a video.
    pub fn thumbnail(&self, source: &Path, output: &Path) -> Result<CliInvocation> {
        validate_output(output, OUTPUT_IMAGE_EXTENSIONS)?;
        let is_image = has_extension(source, IMAGE_EXTENSIONS);
        if is_image {
            validate_input(source, IMAGE_EXTENSIONS)?;
        } else {
            validate_input(source, VIDEO_EXTENSIONS)?;
        }

        let mut cmd = FfmpegCommand::new(source, output);
        if !is_image {
            cmd = cmd.seek(Duration::from_secs(1));
        }
        Ok(cmd
            .output_args([
                "-vf".to_string(),
                format!("scale='min({THUMBNAIL_MAX_WIDTH},iw)':-2"),
                "-frames:v".to_string(),
                "1".to_string(),
                "-q:v".to_string(),
                "5".to_string(),
            ])
            .into_invocation(&self.ffmpeg))
    }

    /// `ffprobe` call printing the container duration in seconds.
    pub fn probe_duration(&self, input: &Path) -> Result<CliInvocation> {
        validate_input(input, VIDEO_EXTENSIONS)?;
        Ok(CliInvocation {
            program: self.ffprobe.clone(),
            args: vec![
                "-v".to_string(),
                "error".to_string(),
                "-show_entries".to_string(),
                "format=duration".to_string(),
                "-of".to_string(),
                "default=noprint_wrappers=1:nokey=1".to_string(),
                input.to_string_lossy().to_string(),
            ],
        })
    }
}

/// Concat-demuxer manifest listing `paths` in order.
pub fn concat_manifest(paths: &[PathBuf]) -> String {
    let mut out = String::new();
    for p in paths {
        let escaped = p.to_string_lossy().replace('\'', r"'\''");
        out.push_str(&format!("file '{escaped}'\n"));
    }
    out
}

/// Video bitrate that keeps `duration` seconds of output within 95% of `size_limit`.
///
/// Falls back to 2 Mbit/s when the duration is unknown.
pub fn compress_video_kbps(size_limit: u64, duration_secs: Option<f64>, audio_kbps: u32) -> u32 {
    const FALLBACK_KBPS: u32 = 2000;
    const MIN_KBPS: f64 = 100.0;

    let Some(duration) = duration_secs.filter(|d| d.is_finite() && *d > 0.0) else {
        return FALLBACK_KBPS;
    };
    let budget_kbits = size_limit as f64 * 8.0 * 0.95 / 1000.0;
    let video = budget_kbits / duration - audio_kbps as f64;
    video.max(MIN_KBPS).min(u32::MAX as f64).floor() as u32
}

/// Parse `ffprobe ... format=duration` output.
pub fn parse_probe_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

fn seconds(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        d.as_secs().to_string()
    } else {
        format!("{:.3}", d.as_secs_f64())
    }
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| allowed.contains(&e.as_str()))
}

fn validate_input(path: &Path, allowed: &[&str]) -> Result<()> {
    if !has_extension(path, allowed) {
        return Err(Error::InvalidPath {
            path: path.to_path_buf(),
            reason: format!("expected one of: {}", allowed.join(", ")),
        });
    }
    if !path.is_file() {
        return Err(Error::InvalidPath {
            path: path.to_path_buf(),
            reason: "input file does not exist".to_string(),
        });
    }
    Ok(())
}

fn validate_output(path: &Path, allowed: &[&str]) -> Result<()> {
    if !has_extension(path, allowed) {
        return Err(Error::InvalidPath {
            path: path.to_path_buf(),
            reason: format!("output must be one of: {}", allowed.join(", ")),
        });
    }
    match path.parent() {
        Some(parent) if parent.is_dir() => Ok(()),
        _ => Err(Error::InvalidPath {
            path: path.to_path_buf(),
            reason: "output directory does not exist".to_string(),
        }),
    }
}

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

const MIB: u64 = 1024 * 1024;

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_api_url: Option<String>,
    /// Empty means everyone may use the bot.
    pub telegram_allowed_users: Vec<i64>,

    // Media engine
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub media_timeout: Duration,

    // Pipeline policy
    pub temp_dir: PathBuf,
    pub size_limit_bytes: u64,
    pub preview_duration: Duration,
    pub split_segment: Duration,
    pub default_thumbnail: Option<PathBuf>,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN")
            .and_then(non_empty)
            .or_else(|| env_str("BOT_TOKEN").and_then(non_empty))
            .unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let telegram_api_url = env_str("TELEGRAM_API_URL").and_then(non_empty);
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));

        let ffmpeg_path = env_path("FFMPEG_PATH")
            .or_else(|| which_in_path("ffmpeg"))
            .unwrap_or_else(|| PathBuf::from("/usr/bin/ffmpeg"));
        let ffprobe_path = env_path("FFPROBE_PATH")
            .or_else(|| which_in_path("ffprobe"))
            .unwrap_or_else(|| PathBuf::from("/usr/bin/ffprobe"));
        let media_timeout = Duration::from_secs(env_u64("MEDIA_TIMEOUT_SECS").unwrap_or(7200));

        let temp_dir =
            PathBuf::from(env_str("TEMP_DIR").unwrap_or("/tmp/video-merge-bot".to_string()));
        fs::create_dir_all(&temp_dir)?;

        let size_limit_mb = env_u64("MAX_FILE_SIZE_MB").unwrap_or(2000);
        if size_limit_mb == 0 {
            return Err(Error::Config("MAX_FILE_SIZE_MB must be positive".to_string()));
        }
        let size_limit_bytes = size_limit_mb.saturating_mul(MIB);

        let preview_duration = Duration::from_secs(env_u64("PREVIEW_SECONDS").unwrap_or(30).max(1));
        let split_segment =
            Duration::from_secs(env_u64("SPLIT_SEGMENT_SECONDS").unwrap_or(600).max(1));
        let default_thumbnail = env_path("DEFAULT_THUMBNAIL");

        let audit_log_path = PathBuf::from(
            env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/video-merge-audit.log".to_string()),
        );
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            telegram_api_url,
            telegram_allowed_users,
            ffmpeg_path,
            ffprobe_path,
            media_timeout,
            temp_dir,
            size_limit_bytes,
            preview_duration,
            split_segment,
            default_thumbnail,
            audit_log_path,
            audit_log_json,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn which_in_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(binary);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_lines_strip_quotes_and_comments() {
        let parsed = parse_dotenv(
            "# comment\n\nTELEGRAM_BOT_TOKEN=\"123:abc\"\nMAX_FILE_SIZE_MB = 1900\nbroken line\n=novalue\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("TELEGRAM_BOT_TOKEN".to_string(), "123:abc".to_string()),
                ("MAX_FILE_SIZE_MB".to_string(), "1900".to_string()),
            ]
        );
    }

    #[test]
    fn csv_ids_skip_garbage() {
        assert_eq!(
            parse_csv_i64(Some(" 1, 2 ,x,,-5".to_string())),
            vec![1, 2, -5]
        );
        assert!(parse_csv_i64(None).is_empty());
    }

    #[test]
    fn bool_flags() {
        assert!(parse_bool("Yes"));
        assert!(parse_bool(" 1 "));
        assert!(!parse_bool("off"));
    }
}

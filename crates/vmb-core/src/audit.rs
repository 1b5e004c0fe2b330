use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,
    pub user_id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<usize>,
}

impl AuditEvent {
    fn base(event: &str, user_id: i64) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            user_id,
            session: None,
            detail: None,
            outcome: None,
            inputs: None,
        }
    }

    pub fn session_start(user_id: i64, session: u64) -> Self {
        Self {
            session: Some(session),
            ..Self::base("session_start", user_id)
        }
    }

    pub fn upload(user_id: i64, session: u64, file_name: &str, inputs: usize) -> Self {
        Self {
            session: Some(session),
            detail: Some(file_name.to_string()),
            inputs: Some(inputs),
            ..Self::base("upload", user_id)
        }
    }

    pub fn merge_requested(user_id: i64, session: u64, inputs: usize) -> Self {
        Self {
            session: Some(session),
            inputs: Some(inputs),
            ..Self::base("merge_requested", user_id)
        }
    }

    pub fn outcome(user_id: i64, session: u64, outcome: &str, detail: Option<&str>) -> Self {
        Self {
            session: Some(session),
            outcome: Some(outcome.to_string()),
            detail: detail.map(|s| s.to_string()),
            ..Self::base("outcome", user_id)
        }
    }

    pub fn unauthorized(user_id: i64) -> Self {
        Self::base("unauthorized", user_id)
    }
}

/// Append-only audit trail of session lifecycle events.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.detail {
            event.detail = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Write and log on failure; audit problems never interrupt a session.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), "failed to write audit event: {e}");
        }
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), AUDIT_MAX_TEXT + 3);
    }

    #[test]
    fn json_lines_skip_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), true);
        log.write(AuditEvent::merge_requested(42, 3, 2)).unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(v["event"], "merge_requested");
        assert_eq!(v["user_id"], 42);
        assert_eq!(v["inputs"], 2);
        assert!(v.get("outcome").is_none());
    }

    #[test]
    fn plain_format_truncates_detail() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), false);
        let long = "x".repeat(AUDIT_MAX_TEXT + 50);
        log.write(AuditEvent::outcome(1, 1, "failed", Some(&long)))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("outcome: failed"));
        assert!(written.contains("..."));
        assert!(!written.contains(&long));
    }
}

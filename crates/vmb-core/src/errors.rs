use std::path::PathBuf;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the orchestrator
/// can handle failures consistently (user-facing message vs logged reason).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    /// A media engine call failed (non-zero exit, missing or empty output).
    #[error("{op} failed: {reason}")]
    Media { op: &'static str, reason: String },

    #[error("illegal stage transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn media(op: &'static str, reason: impl Into<String>) -> Self {
        Error::Media {
            op,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Rejections on the event-handling path.
///
/// None of these change session state; the handler turns them into a reply.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no active session")]
    NoSession,

    #[error("need at least {required} video(s) to merge, have {have}")]
    NotEnoughInputs { required: usize, have: usize },

    #[error("{action} is not available while {stage}")]
    WrongStage {
        action: &'static str,
        stage: &'static str,
    },

    #[error("a job is already in progress")]
    AlreadyInProgress,

    #[error("session already active")]
    AlreadyActive,

    #[error("could not prepare scratch space: {0}")]
    Scratch(#[source] Error),

    #[error("download failed: {0}")]
    Download(#[source] Error),
}

impl SessionError {
    /// Text shown to the user for this rejection.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::NoSession => "Please send /start first.".to_string(),
            SessionError::NotEnoughInputs { required, have } => {
                if *have == 0 {
                    "No videos uploaded.".to_string()
                } else {
                    format!("❗️ Send at least {required} videos to merge (you sent {have}).")
                }
            }
            SessionError::WrongStage { action, stage } => {
                format!("⚠️ Can't {action} right now ({stage}).")
            }
            SessionError::AlreadyInProgress => {
                "⏳ Already in progress. Use /status to check progress or /cancel to stop."
                    .to_string()
            }
            SessionError::AlreadyActive => {
                "A session is already active. Send /cancel to discard it.".to_string()
            }
            SessionError::Scratch(_) => {
                "❌ Could not prepare storage for your session. Please try again.".to_string()
            }
            SessionError::Download(_) => {
                "❌ Failed to download that file. Please send it again.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_error_names_operation() {
        let e = Error::media("concatenate", "exit status 1");
        assert_eq!(e.to_string(), "concatenate failed: exit status 1");
    }

    #[test]
    fn empty_inputs_message_is_distinct() {
        let none = SessionError::NotEnoughInputs {
            required: 1,
            have: 0,
        };
        assert_eq!(none.user_message(), "No videos uploaded.");

        let some = SessionError::NotEnoughInputs {
            required: 2,
            have: 1,
        };
        assert!(some.user_message().contains("at least 2"));
    }
}

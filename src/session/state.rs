use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle of the transcription service as every surface observes it.
///
/// `Starting` covers the window where the companion process is still booting;
/// a service configured without a companion begins in `Idle` directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Listening,
    Saving,
    Saved { path: PathBuf },
    Error { message: String },
}

impl SessionState {
    /// Short lowercase name for logs and status lines.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Listening => "listening",
            SessionState::Saving => "saving",
            SessionState::Saved { .. } => "saved",
            SessionState::Error { .. } => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

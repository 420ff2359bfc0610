use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::SessionState;

/// Point-in-time snapshot of the service, as reported over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Current lifecycle state.
    pub state: SessionState,

    /// When the most recent session started, if any.
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds elapsed since the session started.
    pub duration_secs: f64,

    /// Seconds of normalized audio fed to recognition.
    pub audio_seconds: f64,

    /// Length of the visible transcript in characters.
    pub transcript_chars: usize,
}

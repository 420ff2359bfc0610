// Recognition backend seam.

use anyhow::Result;
use tokio::sync::mpsc;

use crate::audio::NormalizedFrame;

/// Which recognition engine a segment runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionMode {
    /// On-device companion recognizer; no duration ceiling.
    Offline,
    /// Remote recognition service; individual streams are cut off around
    /// sixty seconds, so sessions restart below that.
    Network,
}

impl RecognitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionMode::Offline => "offline",
            RecognitionMode::Network => "network",
        }
    }
}

/// Classified backend failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The request was torn down mid-flight; expected noise during restarts.
    #[error("recognition request cancelled")]
    Cancelled,
    /// The engine heard nothing it could transcribe.
    #[error("no speech detected")]
    NoSpeech,
    /// The engine cannot serve this configuration at all.
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),
    /// Anything else the service reported.
    #[error("recognition service error: {0}")]
    Service(String),
}

impl BackendError {
    /// Errors that carry no information worth acting on.
    pub fn is_noise(&self) -> bool {
        matches!(self, BackendError::Cancelled | BackendError::NoSpeech)
    }
}

/// Event stream out of a running backend segment.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// Cumulative recognized text for the CURRENT segment, not a delta.
    /// Backends that produce incremental results join them before reporting.
    Transcript { text: String },
    Error(BackendError),
}

/// One recognition engine connection.
///
/// A backend instance serves exactly one segment: start it, feed it frames,
/// finish it, drop it. Restarts build a fresh instance through the provider.
#[async_trait::async_trait]
pub trait RecognitionBackend: Send {
    /// Begin the segment; events arrive on the returned channel.
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>>;

    /// Queue one normalized frame. Must not block the caller.
    fn feed(&mut self, frame: NormalizedFrame);

    /// Request final results and end audio input. Safe to call more than
    /// once, and also the teardown path on errors.
    async fn finish(&mut self);

    /// Engine name for logging.
    fn name(&self) -> &str;
}

/// Builds backends per mode and answers the capability query that picks the
/// initial mode.
pub trait BackendProvider: Send + Sync {
    /// Whether the on-device engine is usable right now.
    fn offline_available(&self) -> bool;

    fn make(&self, mode: RecognitionMode) -> Result<Box<dyn RecognitionBackend>>;
}

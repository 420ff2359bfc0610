// Platform seam for system-audio capture.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::frame::AudioFormat;

/// Capture-layer errors, classified so callers can tell permission problems
/// from everything else.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("no capturable audio source is available")]
    NoSourceAvailable,
    #[error("screen capture permission has not been granted")]
    NotAuthorized,
    #[error("capture configuration failed: {0}")]
    Configuration(String),
    #[error("capture stream failed: {0}")]
    Stream(String),
}

/// Minimal video output registered alongside the audio output.
///
/// The capture service stops delivering audio frames when no video output is
/// attached, so every session registers a throwaway one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoKeepalive {
    pub width: u32,
    pub height: u32,
    pub frames_per_second: u32,
}

impl Default for VideoKeepalive {
    fn default() -> Self {
        Self {
            width: 2,
            height: 2,
            frames_per_second: 1,
        }
    }
}

/// Capture configuration handed to the platform source.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Nominal sample rate requested from the platform
    pub sample_rate: u32,
    /// Nominal channel count requested from the platform
    pub channels: u16,
    /// Exclude this process's own audio from the capture mix
    pub exclude_current_process: bool,
    /// Throwaway video output registered with the audio output
    pub video_keepalive: VideoKeepalive,
    /// Grace period before the single permission retry
    pub permission_grace: std::time::Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            exclude_current_process: true,
            video_keepalive: VideoKeepalive::default(),
            permission_grace: std::time::Duration::from_millis(1_500),
        }
    }
}

/// One buffer delivered by the capture service.
///
/// The audio payload may still live in the capture service's process when the
/// buffer arrives; callers probe `is_ready` first and extract in two passes
/// (size, then copy).
pub trait SampleBuffer: Send {
    /// Declared format of the payload.
    fn format(&self) -> AudioFormat;

    /// Number of sample frames (per channel) in the payload.
    fn frame_count(&self) -> usize;

    /// Whether the payload bytes are materialized locally.
    fn is_ready(&self) -> bool;

    /// Kick off the asynchronous fetch of a not-ready payload.
    fn request_data(&self);

    /// Pass one: bytes required to hold the planar little-endian f32 payload.
    fn payload_size(&self) -> Result<usize, CaptureError>;

    /// Pass two: copy the planar payload into `out`, returning bytes written.
    fn copy_payload(&self, out: &mut [u8]) -> Result<usize, CaptureError>;
}

/// Non-blocking delivery entry point handed to the platform source.
///
/// Invoked from the platform's own delivery thread. Never blocks: on a full
/// channel the buffer is dropped, and after stop the sink goes quiet.
#[derive(Clone)]
pub struct DeliverySink {
    tx: mpsc::Sender<Box<dyn SampleBuffer>>,
    stopped: Arc<AtomicBool>,
}

impl DeliverySink {
    pub(crate) fn new(tx: mpsc::Sender<Box<dyn SampleBuffer>>, stopped: Arc<AtomicBool>) -> Self {
        Self { tx, stopped }
    }

    /// Hand one buffer to the pipeline. Safe to call concurrently with stop.
    pub fn deliver(&self, buffer: Box<dyn SampleBuffer>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(buffer) {
            tracing::trace!("capture delivery dropped on backpressure");
        }
    }

    /// Whether the owning session has stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Platform capture service seam.
///
/// Implementations: macOS ScreenCaptureKit (`crate::screencapture`), WAV file
/// playback (`super::file`), scripted fakes in tests.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Resolve the capture target (shareable display content).
    async fn resolve(&mut self) -> Result<(), CaptureError>;

    /// Apply the audio-only configuration plus the video keep-alive.
    async fn configure(&mut self, config: &CaptureConfig) -> Result<(), CaptureError>;

    /// Start the platform stream; deliveries hit the sink from the platform's
    /// own thread.
    async fn begin(&mut self, sink: DeliverySink) -> Result<(), CaptureError>;

    /// Stop the platform stream. Must be safe to call more than once.
    async fn end(&mut self) -> Result<(), CaptureError>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Builds a fresh capture source for each session.
pub trait SourceProvider: Send + Sync {
    fn make(&self) -> Result<Box<dyn CaptureSource>, CaptureError>;
}

/// Capture source selector.
#[derive(Debug, Clone)]
pub enum SourceKind {
    /// Device-wide system audio (macOS ScreenCaptureKit)
    System,
    /// WAV file playback (batch processing and tests)
    File(PathBuf),
}

/// Default provider: builds the configured platform source per session.
pub struct PlatformSources {
    kind: SourceKind,
}

impl PlatformSources {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind }
    }
}

impl SourceProvider for PlatformSources {
    fn make(&self) -> Result<Box<dyn CaptureSource>, CaptureError> {
        match &self.kind {
            SourceKind::System => {
                #[cfg(target_os = "macos")]
                {
                    Ok(Box::new(crate::screencapture::ScreenCaptureSource::new()))
                }

                #[cfg(not(target_os = "macos"))]
                {
                    Err(CaptureError::NoSourceAvailable)
                }
            }

            SourceKind::File(path) => {
                let source = super::file::FileSource::open(path)
                    .map_err(|e| CaptureError::Configuration(e.to_string()))?;
                Ok(Box::new(source))
            }
        }
    }
}

pub mod audio;
pub mod auth;
pub mod companion;
pub mod config;
pub mod http;
pub mod recognition;
#[cfg(target_os = "macos")]
pub mod screencapture;
pub mod session;
pub mod store;

pub use audio::{
    AudioFormat, CaptureConfig, CaptureError, CaptureSession, CaptureSource, DeliverySink,
    FileSource, FormatNormalizer, NormalizedFrame, PlatformSources, RawFrame, SampleBuffer,
    SourceKind, SourceProvider,
};
pub use auth::{AuthorizationProvider, AuthorizationStatus, StaticAuthorizer};
pub use companion::{CompanionEvent, CompanionSupervisor};
pub use config::Config;
pub use http::{create_router, AppState};
pub use recognition::{
    AudioFrameMessage, BackendError, BackendEvent, BackendProvider, EngineProvider,
    NetworkSettings, RecognitionBackend, RecognitionConfig, RecognitionMode, RecognitionSession,
    RecognitionUpdate, TranscriptMessage,
};
pub use session::{
    ControllerConfig, SessionCallbacks, SessionController, SessionDeps, SessionState, SessionStats,
};
pub use store::{FixedPathStore, MarkdownStore, TranscriptMeta, TranscriptStore};

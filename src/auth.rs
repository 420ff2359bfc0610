//! Permission checks for capture and recognition.

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    /// The user has not decided yet; the platform prompt is in flight or
    /// will appear on first use.
    Undetermined,
}

/// Answers permission questions before a pipeline stage starts.
///
/// Capture denial also surfaces through the capture start path itself, so a
/// provider that optimistically answers `Authorized` still ends up with the
/// right behavior; the seam mainly exists so tests can script denials and so
/// recognition can refuse before opening a backend.
#[async_trait::async_trait]
pub trait AuthorizationProvider: Send + Sync {
    async fn request_capture(&self) -> AuthorizationStatus;
    async fn request_recognition(&self) -> AuthorizationStatus;
}

/// Provider that returns fixed answers.
pub struct StaticAuthorizer {
    capture: AuthorizationStatus,
    recognition: AuthorizationStatus,
}

impl StaticAuthorizer {
    pub fn new(capture: AuthorizationStatus, recognition: AuthorizationStatus) -> Self {
        Self {
            capture,
            recognition,
        }
    }

    /// Grants everything. The platform still gets the last word through the
    /// capture and recognition error paths.
    pub fn allow_all() -> Self {
        Self::new(
            AuthorizationStatus::Authorized,
            AuthorizationStatus::Authorized,
        )
    }
}

#[async_trait::async_trait]
impl AuthorizationProvider for StaticAuthorizer {
    async fn request_capture(&self) -> AuthorizationStatus {
        self.capture
    }

    async fn request_recognition(&self) -> AuthorizationStatus {
        self.recognition
    }
}

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::state::SessionState;
use super::stats::SessionStats;
use crate::audio::{CaptureConfig, CaptureError, CaptureSession, NormalizedFrame, SourceProvider};
use crate::auth::{AuthorizationProvider, AuthorizationStatus};
use crate::recognition::{BackendProvider, RecognitionConfig, RecognitionSession, RecognitionUpdate};
use crate::store::{TranscriptMeta, TranscriptStore};

pub type AudioCallback = Box<dyn Fn(&NormalizedFrame) + Send + Sync>;
pub type TranscriptCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Observers wired in at construction and never reassigned. Callbacks run on
/// the controller's internal tasks and must not call back into the
/// controller.
#[derive(Default)]
pub struct SessionCallbacks {
    /// Invoked for every normalized frame while listening.
    pub on_audio: Option<AudioCallback>,
    /// Invoked with the full visible transcript after every update.
    pub on_transcript: Option<TranscriptCallback>,
    /// Invoked with the message whenever the controller enters `Error`.
    pub on_error: Option<ErrorCallback>,
}

/// Collaborators behind the controller's seams.
pub struct SessionDeps {
    pub sources: Arc<dyn SourceProvider>,
    pub engines: Arc<dyn BackendProvider>,
    pub authorizer: Arc<dyn AuthorizationProvider>,
    pub store: Arc<dyn TranscriptStore>,
}

/// Timing and pipeline settings for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub capture: CaptureConfig,
    pub recognition: RecognitionConfig,
    /// How long `Saved` stays visible before clearing back to `Idle`.
    pub saved_notice: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            recognition: RecognitionConfig::default(),
            saved_notice: Duration::from_secs(3),
        }
    }
}

/// Everything owned by one listening run.
struct ListeningHandle {
    capture: CaptureSession,
    recognition: RecognitionSession,
    /// The session loop; resolves to the final visible transcript.
    pump: JoinHandle<String>,
}

struct Inner {
    state: SessionState,
    /// Bumped on every transition. Timers and late failures compare against
    /// it so cancelled work never clobbers newer state.
    epoch: u64,
    session_id: String,
    started_at: Option<DateTime<Utc>>,
    listening: Option<ListeningHandle>,
}

struct Shared {
    config: ControllerConfig,
    deps: SessionDeps,
    callbacks: SessionCallbacks,
    /// Current visible transcript; written only by the session loop.
    transcript: Mutex<String>,
    /// Milliseconds of normalized audio fed to recognition this session.
    audio_millis: AtomicU64,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Every state change funnels through here; entering `Error` fires the
    /// error callback.
    fn set_state(&self, inner: &mut Inner, next: SessionState) {
        inner.epoch += 1;
        info!("session state {} -> {}", inner.state.label(), next.label());
        if let SessionState::Error { message } = &next {
            if let Some(cb) = &self.callbacks.on_error {
                cb(message);
            }
        }
        inner.state = next;
    }
}

/// Owns the whole pipeline and serializes every lifecycle transition.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    /// Builds the controller. `companion_pending` starts the state machine in
    /// `Starting` until the companion reports ready (or fails to).
    pub fn new(
        config: ControllerConfig,
        deps: SessionDeps,
        callbacks: SessionCallbacks,
        companion_pending: bool,
    ) -> Self {
        let initial = if companion_pending {
            SessionState::Starting
        } else {
            SessionState::Idle
        };
        Self {
            shared: Arc::new(Shared {
                config,
                deps,
                callbacks,
                transcript: Mutex::new(String::new()),
                audio_millis: AtomicU64::new(0),
                inner: Mutex::new(Inner {
                    state: initial,
                    epoch: 0,
                    session_id: String::new(),
                    started_at: None,
                    listening: None,
                }),
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state.clone()
    }

    /// Current visible transcript, empty outside a session.
    pub async fn transcript(&self) -> String {
        self.shared.transcript.lock().await.clone()
    }

    pub async fn stats(&self) -> SessionStats {
        let (state, started_at) = {
            let inner = self.shared.inner.lock().await;
            (inner.state.clone(), inner.started_at)
        };
        let duration_secs = started_at
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        SessionStats {
            state,
            started_at,
            duration_secs,
            audio_seconds: self.shared.audio_millis.load(Ordering::Relaxed) as f64 / 1000.0,
            transcript_chars: self.shared.transcript.lock().await.chars().count(),
        }
    }

    /// Starts capture and recognition. Only legal from `Idle`; any startup
    /// failure lands in `Error` with an actionable message.
    pub async fn start_listening(&self) -> Result<()> {
        let epoch = {
            let mut inner = self.shared.inner.lock().await;
            match inner.state {
                SessionState::Idle => {}
                ref other => anyhow::bail!("cannot start listening while {}", other),
            }
            self.shared.set_state(&mut inner, SessionState::Listening);
            inner.session_id = uuid::Uuid::new_v4().to_string();
            inner.started_at = Some(Utc::now());
            info!("session {} starting", inner.session_id);
            inner.epoch
        };
        self.shared.audio_millis.store(0, Ordering::Relaxed);
        self.shared.transcript.lock().await.clear();

        match self.bring_up(epoch).await {
            Ok(handle) => {
                let mut inner = self.shared.inner.lock().await;
                if inner.epoch != epoch {
                    // Something (companion crash, concurrent stop) superseded
                    // this startup while it was in flight.
                    drop(inner);
                    let _ = tear_down(handle).await;
                    anyhow::bail!("session superseded during startup");
                }
                inner.listening = Some(handle);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let mut inner = self.shared.inner.lock().await;
                if inner.epoch == epoch {
                    self.shared
                        .set_state(&mut inner, SessionState::Error { message });
                }
                Err(e)
            }
        }
    }

    async fn bring_up(&self, epoch: u64) -> Result<ListeningHandle> {
        if self.shared.deps.authorizer.request_capture().await == AuthorizationStatus::Denied {
            anyhow::bail!(
                "Screen recording permission was denied. \
                 Enable it for this app in System Settings under Privacy & Security."
            );
        }

        let source = self
            .shared
            .deps
            .sources
            .make()
            .map_err(|e| anyhow::anyhow!(capture_error_message(&e)))?;
        let mut capture = CaptureSession::new(self.shared.config.capture.clone());
        let frames = capture
            .start(source)
            .await
            .map_err(|e| anyhow::anyhow!(capture_error_message(&e)))?;

        let (recognition, audio_tx, updates) = RecognitionSession::spawn(
            Arc::clone(&self.shared.deps.engines),
            Arc::clone(&self.shared.deps.authorizer),
            self.shared.config.recognition.clone(),
        );

        let shared = Arc::clone(&self.shared);
        let pump = tokio::spawn(run_session_loop(shared, epoch, frames, audio_tx, updates));
        Ok(ListeningHandle {
            capture,
            recognition,
            pump,
        })
    }

    /// Stops the pipeline, waits for full quiescence, persists the
    /// transcript. Returns the written path, or `Ok(None)` when there was
    /// nothing to stop. Safe to call repeatedly.
    pub async fn stop_and_save(&self) -> Result<Option<PathBuf>> {
        let (handle, session_id, started_at) = {
            let mut inner = self.shared.inner.lock().await;
            if !matches!(inner.state, SessionState::Listening) {
                debug!("stop requested while {}, nothing to do", inner.state.label());
                return Ok(None);
            }
            match inner.listening.take() {
                Some(handle) => {
                    self.shared.set_state(&mut inner, SessionState::Saving);
                    (handle, inner.session_id.clone(), inner.started_at)
                }
                // A startup is still in flight; superseding its epoch makes
                // the commit step tear everything down.
                None => {
                    self.shared.set_state(&mut inner, SessionState::Idle);
                    return Ok(None);
                }
            }
        };

        let final_text = match tear_down(handle).await {
            Some(text) => text,
            None => self.shared.transcript.lock().await.clone(),
        };
        // From here no session task is alive; no callback fires after this
        // method returns.

        let meta = TranscriptMeta {
            session_id,
            started_at,
            audio_seconds: self.shared.audio_millis.load(Ordering::Relaxed) as f64 / 1000.0,
        };
        info!(
            "session {} stopped after {:.1} s of audio",
            meta.session_id, meta.audio_seconds
        );
        let saved = self.shared.deps.store.save(&final_text, &meta).await;

        let mut inner = self.shared.inner.lock().await;
        match saved {
            Ok(path) => {
                if matches!(inner.state, SessionState::Saving) {
                    self.shared
                        .set_state(&mut inner, SessionState::Saved { path: path.clone() });
                    self.spawn_saved_clear(inner.epoch);
                }
                Ok(Some(path))
            }
            Err(e) => {
                if matches!(inner.state, SessionState::Saving) {
                    let message = format!("Could not save the transcript: {}", e);
                    self.shared
                        .set_state(&mut inner, SessionState::Error { message });
                }
                Err(e)
            }
        }
    }

    /// Schedules the `Saved` banner to clear. The epoch guard keeps the
    /// timer from clobbering any state that replaced `Saved` in the
    /// meantime.
    fn spawn_saved_clear(&self, epoch: u64) {
        let shared = Arc::clone(&self.shared);
        let notice = self.shared.config.saved_notice;
        tokio::spawn(async move {
            tokio::time::sleep(notice).await;
            let mut inner = shared.inner.lock().await;
            if inner.epoch == epoch && matches!(inner.state, SessionState::Saved { .. }) {
                shared.set_state(&mut inner, SessionState::Idle);
            }
        });
    }

    /// Clears an error. Returns false from any other state.
    pub async fn retry(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        if matches!(inner.state, SessionState::Error { .. }) {
            self.shared.set_state(&mut inner, SessionState::Idle);
            true
        } else {
            false
        }
    }

    /// Companion READY signal: leaves `Starting`, otherwise a no-op.
    pub async fn companion_ready(&self) {
        let mut inner = self.shared.inner.lock().await;
        if matches!(inner.state, SessionState::Starting) {
            self.shared.set_state(&mut inner, SessionState::Idle);
        }
    }

    /// Companion never became ready in time. The service stays usable with
    /// network recognition only.
    pub async fn companion_timed_out(&self) {
        let mut inner = self.shared.inner.lock().await;
        if matches!(inner.state, SessionState::Starting) {
            warn!("companion not ready in time; continuing without offline recognition");
            self.shared.set_state(&mut inner, SessionState::Idle);
        }
    }

    /// Companion process exit. A clean exit downgrades to network-only; a
    /// crash is a terminal error, tearing down any active session.
    pub async fn companion_exited(&self, code: Option<i32>) {
        if code == Some(0) {
            let mut inner = self.shared.inner.lock().await;
            if matches!(inner.state, SessionState::Starting) {
                warn!("companion exited before becoming ready");
                self.shared.set_state(&mut inner, SessionState::Idle);
            }
            return;
        }

        let message = match code {
            Some(c) => format!("Transcription companion exited unexpectedly (status {}).", c),
            None => "Transcription companion was killed.".to_string(),
        };
        let handle = {
            let mut inner = self.shared.inner.lock().await;
            let handle = inner.listening.take();
            self.shared
                .set_state(&mut inner, SessionState::Error { message });
            handle
        };
        if let Some(handle) = handle {
            let _ = tear_down(handle).await;
        }
    }
}

/// Forwards frames to recognition and transcript updates to observers.
/// Returns the final visible transcript.
async fn run_session_loop(
    shared: Arc<Shared>,
    epoch: u64,
    mut frames: mpsc::Receiver<NormalizedFrame>,
    audio_tx: mpsc::Sender<NormalizedFrame>,
    mut updates: mpsc::Receiver<RecognitionUpdate>,
) -> String {
    let mut last = String::new();
    let mut frames_open = true;
    loop {
        tokio::select! {
            maybe_frame = frames.recv(), if frames_open => match maybe_frame {
                Some(frame) => {
                    let millis = (frame.duration_secs() * 1000.0).round() as u64;
                    shared.audio_millis.fetch_add(millis, Ordering::Relaxed);
                    if let Some(cb) = &shared.callbacks.on_audio {
                        cb(&frame);
                    }
                    if audio_tx.try_send(frame).is_err() {
                        trace!("recognition input full, frame dropped");
                    }
                }
                None => frames_open = false,
            },
            maybe_update = updates.recv() => match maybe_update {
                Some(RecognitionUpdate::Transcript(text)) => {
                    *shared.transcript.lock().await = text.clone();
                    if let Some(cb) = &shared.callbacks.on_transcript {
                        cb(&text);
                    }
                    last = text;
                }
                Some(RecognitionUpdate::Failed(message)) => {
                    // Recognition is terminally down; unwind the rest of the
                    // session from a task that is not this loop.
                    let cleanup = Arc::clone(&shared);
                    tokio::spawn(async move {
                        abort_listening(cleanup, epoch, message).await;
                    });
                    return last;
                }
                None => return last,
            },
        }
    }
}

/// Moves a failed session into `Error` and releases its resources. A stale
/// epoch means some newer transition already took over; nothing happens.
async fn abort_listening(shared: Arc<Shared>, epoch: u64, message: String) {
    let handle = {
        let mut inner = shared.inner.lock().await;
        if inner.epoch != epoch {
            debug!("stale session failure ignored: {}", message);
            return;
        }
        let handle = inner.listening.take();
        shared.set_state(&mut inner, SessionState::Error { message });
        handle
    };
    if let Some(handle) = handle {
        let _ = tear_down(handle).await;
    }
}

/// Stops capture, then recognition, then joins the session loop, in that
/// order so every pending update drains before the join. `None` only when
/// the loop panicked.
async fn tear_down(handle: ListeningHandle) -> Option<String> {
    let ListeningHandle {
        mut capture,
        mut recognition,
        pump,
    } = handle;
    capture.stop().await;
    recognition.stop().await;
    match pump.await {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("session loop panicked: {}", e);
            None
        }
    }
}

fn capture_error_message(e: &CaptureError) -> String {
    match e {
        CaptureError::NotAuthorized => "Screen recording permission was denied. \
             Enable it for this app in System Settings under Privacy & Security."
            .to_string(),
        CaptureError::NoSourceAvailable => "No capturable audio source was found.".to_string(),
        other => format!("Audio capture failed: {}", other),
    }
}

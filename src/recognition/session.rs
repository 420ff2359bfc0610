// Recognition session: segment lifecycle, restarts around the network
// ceiling, and permanent offline-to-network failover.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::backend::{BackendError, BackendEvent, BackendProvider, RecognitionBackend, RecognitionMode};
use super::transcript::TranscriptAccumulator;
use crate::auth::{AuthorizationProvider, AuthorizationStatus};
use crate::audio::NormalizedFrame;

/// Timing knobs for segment management.
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Language the engines are asked to recognize.
    pub locale: String,
    /// How long a network segment may run before a proactive restart. The
    /// remote service cuts streams off at roughly sixty seconds; stay under.
    pub segment_limit: Duration,
    /// Pause between finishing one backend and starting the next, giving the
    /// old engine time to deliver its last results.
    pub teardown_delay: Duration,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            segment_limit: Duration::from_secs(55),
            teardown_delay: Duration::from_millis(300),
        }
    }
}

/// Updates surfaced to the owner of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionUpdate {
    /// Full visible transcript after the latest engine report.
    Transcript(String),
    /// Terminal failure; the session has already torn itself down.
    Failed(String),
}

enum Command {
    Stop(oneshot::Sender<()>),
}

/// A streaming recognition session.
///
/// The session is idle until [`RecognitionSession::spawn`] brings up its
/// worker; after that one task owns every state change, so segment starts,
/// restarts, failover, and stop never race each other.
pub struct RecognitionSession {
    cmd_tx: mpsc::Sender<Command>,
    task: Option<JoinHandle<()>>,
}

impl RecognitionSession {
    /// Spawns the worker. Frames go into the returned sender; transcript and
    /// failure updates come out of the returned receiver, which closes once
    /// the worker has fully stopped.
    pub fn spawn(
        provider: Arc<dyn BackendProvider>,
        authorizer: Arc<dyn AuthorizationProvider>,
        config: RecognitionConfig,
    ) -> (
        Self,
        mpsc::Sender<NormalizedFrame>,
        mpsc::Receiver<RecognitionUpdate>,
    ) {
        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (update_tx, update_rx) = mpsc::channel(32);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let task = tokio::spawn(async move {
            let worker = Worker::new(provider, authorizer, config, update_tx);
            worker.run(audio_rx, cmd_rx).await;
        });
        let session = Self {
            cmd_tx,
            task: Some(task),
        };
        (session, audio_tx, update_rx)
    }

    /// Stops the session and waits for the backend to be fully torn down.
    /// No update is sent after this returns. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("recognition worker panicked: {}", e);
            }
        }
    }
}

/// Worker lifecycle. The session starts in `Starting` the moment it is
/// spawned and never leaves `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Starting,
    Running(RecognitionMode),
    Restarting,
    Stopped,
}

struct ActiveBackend {
    backend: Box<dyn RecognitionBackend>,
    events: mpsc::Receiver<BackendEvent>,
}

struct Worker {
    provider: Arc<dyn BackendProvider>,
    authorizer: Arc<dyn AuthorizationProvider>,
    config: RecognitionConfig,
    update_tx: mpsc::Sender<RecognitionUpdate>,
    state: RunState,
    offline_failed: bool,
    accumulator: TranscriptAccumulator,
    active: Option<ActiveBackend>,
    /// Armed while a network segment runs.
    restart_at: Option<Instant>,
    /// Armed between segments, after teardown.
    resume_at: Option<Instant>,
}

impl Worker {
    fn new(
        provider: Arc<dyn BackendProvider>,
        authorizer: Arc<dyn AuthorizationProvider>,
        config: RecognitionConfig,
        update_tx: mpsc::Sender<RecognitionUpdate>,
    ) -> Self {
        Self {
            provider,
            authorizer,
            config,
            update_tx,
            state: RunState::Starting,
            offline_failed: false,
            accumulator: TranscriptAccumulator::new(),
            active: None,
            restart_at: None,
            resume_at: None,
        }
    }

    async fn run(
        mut self,
        mut audio_rx: mpsc::Receiver<NormalizedFrame>,
        mut cmd_rx: mpsc::Receiver<Command>,
    ) {
        if self.authorizer.request_recognition().await == AuthorizationStatus::Denied {
            self.fail(
                "Speech recognition permission denied. \
                 Enable it in System Settings under Privacy & Security."
                    .to_string(),
            )
            .await;
            return;
        }
        info!("recognition session starting (locale {})", self.config.locale);
        self.start_segment().await;

        let mut audio_open = true;
        while self.state != RunState::Stopped {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Stop(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                    }
                    // The handle is gone; nobody is left to ack.
                    None => self.shutdown().await,
                },
                maybe_frame = audio_rx.recv(), if audio_open => match maybe_frame {
                    Some(frame) => self.on_frame(frame),
                    None => audio_open = false,
                },
                maybe_event = Self::next_event(&mut self.active) => match maybe_event {
                    Some(event) => self.on_event(event).await,
                    None => {
                        self.on_error(BackendError::Service(
                            "engine event stream ended".to_string(),
                        ))
                        .await;
                    }
                },
                _ = Self::deadline(self.restart_at), if self.restart_at.is_some() => {
                    info!("segment limit reached, restarting recognition");
                    self.restart_at = None;
                    self.begin_restart().await;
                }
                _ = Self::deadline(self.resume_at), if self.resume_at.is_some() => {
                    self.resume_at = None;
                    self.start_segment().await;
                }
            }
        }
    }

    async fn next_event(active: &mut Option<ActiveBackend>) -> Option<BackendEvent> {
        match active {
            Some(active) => active.events.recv().await,
            None => future::pending().await,
        }
    }

    async fn deadline(at: Option<Instant>) {
        match at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => future::pending().await,
        }
    }

    /// Mode for the next segment: offline while the companion is up and has
    /// never failed, network otherwise. A failed offline engine is never
    /// retried within this session.
    fn pick_mode(&self) -> RecognitionMode {
        if !self.offline_failed && self.provider.offline_available() {
            RecognitionMode::Offline
        } else {
            RecognitionMode::Network
        }
    }

    /// Builds and starts a backend for the picked mode. An offline start
    /// failure fails over to network immediately; a network start failure is
    /// terminal.
    async fn start_segment(&mut self) {
        loop {
            let mode = self.pick_mode();
            match self.bring_up(mode).await {
                Ok(active) => {
                    info!("recognition segment running on {} engine", active.backend.name());
                    self.active = Some(active);
                    self.state = RunState::Running(mode);
                    self.restart_at = match mode {
                        RecognitionMode::Network => {
                            Some(Instant::now() + self.config.segment_limit)
                        }
                        RecognitionMode::Offline => None,
                    };
                    return;
                }
                Err(e) if mode == RecognitionMode::Offline => {
                    warn!(
                        "offline engine failed to start ({}), switching to network for the rest of this session",
                        e
                    );
                    self.offline_failed = true;
                }
                Err(e) => {
                    error!("recognition backend failed to start: {}", e);
                    self.fail(format!("Speech recognition is unavailable: {}", e))
                        .await;
                    return;
                }
            }
        }
    }

    async fn bring_up(&mut self, mode: RecognitionMode) -> Result<ActiveBackend> {
        let mut backend = self.provider.make(mode)?;
        let events = backend.start().await?;
        Ok(ActiveBackend { backend, events })
    }

    fn on_frame(&mut self, frame: NormalizedFrame) {
        match (&mut self.active, self.state) {
            (Some(active), RunState::Running(_)) => active.backend.feed(frame),
            _ => trace!("frame dropped between segments"),
        }
    }

    async fn on_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Transcript { text } => {
                self.accumulator.set_live(&text);
                let visible = self.accumulator.visible();
                trace!("transcript now {} chars", visible.len());
                if self
                    .update_tx
                    .send(RecognitionUpdate::Transcript(visible))
                    .await
                    .is_err()
                {
                    debug!("transcript update dropped, receiver gone");
                }
            }
            BackendEvent::Error(err) => self.on_error(err).await,
        }
    }

    async fn on_error(&mut self, err: BackendError) {
        if err.is_noise() {
            debug!("ignoring engine report: {}", err);
            return;
        }
        match self.state {
            RunState::Running(RecognitionMode::Offline) => {
                warn!(
                    "offline engine failed ({}), switching to network for the rest of this session",
                    err
                );
                self.offline_failed = true;
                self.begin_restart().await;
            }
            RunState::Running(RecognitionMode::Network) => {
                warn!("network engine failed ({}), restarting segment", err);
                self.begin_restart().await;
            }
            _ => debug!("stale engine error ignored: {}", err),
        }
    }

    /// Restart protocol: keep what the old segment produced, tear it down,
    /// come back after the teardown delay.
    async fn begin_restart(&mut self) {
        self.accumulator.snapshot();
        self.finish_active().await;
        self.state = RunState::Restarting;
        self.restart_at = None;
        self.resume_at = Some(Instant::now() + self.config.teardown_delay);
    }

    /// Teardown shared by restart, failover, terminal failure, and stop.
    /// Dropping the event receiver here is what makes late reports from the
    /// old backend vanish instead of reaching the session.
    async fn finish_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.backend.finish().await;
        }
    }

    async fn fail(&mut self, message: String) {
        self.finish_active().await;
        self.state = RunState::Stopped;
        self.restart_at = None;
        self.resume_at = None;
        let _ = self.update_tx.send(RecognitionUpdate::Failed(message)).await;
    }

    async fn shutdown(&mut self) {
        self.restart_at = None;
        self.resume_at = None;
        self.finish_active().await;
        self.state = RunState::Stopped;
        debug!("recognition session stopped");
    }
}

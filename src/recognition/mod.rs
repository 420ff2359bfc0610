//! Streaming speech recognition: engine backends, the restart-aware session
//! that drives them, and transcript assembly.

pub mod backend;
pub mod network;
pub mod offline;
pub mod session;
pub mod transcript;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

pub use backend::{BackendError, BackendEvent, BackendProvider, RecognitionBackend, RecognitionMode};
pub use network::{AudioFrameMessage, NetworkBackend, NetworkSettings, TranscriptMessage};
pub use offline::CompanionBackend;
pub use session::{RecognitionConfig, RecognitionSession, RecognitionUpdate};
pub use transcript::TranscriptAccumulator;

/// Production engine provider: the companion socket for offline work, NATS
/// for network work.
pub struct EngineProvider {
    companion_port: u16,
    network: NetworkSettings,
    offline_ready: Arc<AtomicBool>,
}

impl EngineProvider {
    pub fn new(companion_port: u16, network: NetworkSettings) -> Self {
        Self {
            companion_port,
            network,
            offline_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag the companion supervisor flips when the process reports READY
    /// and clears when it exits.
    pub fn offline_ready_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.offline_ready)
    }

    /// One-shot check for a companion that is already running (no
    /// supervision). Used when autostart is disabled.
    pub async fn probe_offline(&self) {
        let addr = format!("127.0.0.1:{}", self.companion_port);
        let probe = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            tokio::net::TcpStream::connect(&addr),
        )
        .await;
        if matches!(probe, Ok(Ok(_))) {
            tracing::info!("companion already listening on {}", addr);
            self.offline_ready.store(true, Ordering::SeqCst);
        }
    }
}

impl BackendProvider for EngineProvider {
    fn offline_available(&self) -> bool {
        self.offline_ready.load(Ordering::SeqCst)
    }

    fn make(&self, mode: RecognitionMode) -> Result<Box<dyn RecognitionBackend>> {
        match mode {
            RecognitionMode::Offline => Ok(Box::new(CompanionBackend::new(self.companion_port))),
            RecognitionMode::Network => Ok(Box::new(NetworkBackend::new(self.network.clone()))),
        }
    }
}

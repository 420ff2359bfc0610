// Capture session: startup protocol, delivery pump, two-pass extraction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::{NormalizedFrame, RawFrame};
use super::normalize::FormatNormalizer;
use super::source::{CaptureConfig, CaptureError, CaptureSource, DeliverySink, SampleBuffer};

/// Capacity of the platform delivery channel. The delivery thread drops
/// buffers rather than block when the pump falls behind.
const DELIVERY_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the normalized-frame channel toward the recognizer.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// The running capture: platform source plus pump task plus stop flag.
struct CaptureHandle {
    source: Box<dyn CaptureSource>,
    pump: JoinHandle<()>,
    stopped: Arc<AtomicBool>,
}

/// System-audio capture session.
///
/// Runs the startup protocol (resolve, configure, begin, with a single
/// permission retry after a grace period) and owns the pump task that turns
/// platform deliveries into normalized frames. At most one handle is active
/// at a time; `stop` is idempotent.
pub struct CaptureSession {
    config: CaptureConfig,
    handle: Option<CaptureHandle>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    /// Brings the source up and begins streaming, returning the
    /// normalized-frame receiver.
    ///
    /// A permission-classified failure is retried exactly once after the
    /// configured grace period; anything else propagates immediately.
    pub async fn start(
        &mut self,
        mut source: Box<dyn CaptureSource>,
    ) -> Result<mpsc::Receiver<NormalizedFrame>, CaptureError> {
        if self.handle.is_some() {
            return Err(CaptureError::Configuration(
                "capture session already active".to_string(),
            ));
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let (buffer_tx, buffer_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let sink = DeliverySink::new(buffer_tx, stopped.clone());

        match Self::bring_up(source.as_mut(), &self.config, sink.clone()).await {
            Ok(()) => {}
            Err(CaptureError::NotAuthorized) => {
                warn!(
                    "capture permission not granted, retrying once in {:?}",
                    self.config.permission_grace
                );
                tokio::time::sleep(self.config.permission_grace).await;
                Self::bring_up(source.as_mut(), &self.config, sink).await?;
            }
            Err(e) => return Err(e),
        }

        let (frame_tx, frame_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let pump_stopped = stopped.clone();
        let pump =
            tokio::spawn(async move { pump_buffers(buffer_rx, frame_tx, pump_stopped).await });

        info!("capture session started ({})", source.name());
        self.handle = Some(CaptureHandle {
            source,
            pump,
            stopped,
        });
        Ok(frame_rx)
    }

    /// One pass of the startup protocol: resolve, configure, begin.
    async fn bring_up(
        source: &mut dyn CaptureSource,
        config: &CaptureConfig,
        sink: DeliverySink,
    ) -> Result<(), CaptureError> {
        source.resolve().await?;
        source.configure(config).await?;
        source.begin(sink).await
    }

    /// Ends the platform stream and waits for the pump to drain.
    ///
    /// Safe to call repeatedly and while deliveries are still arriving;
    /// late deliveries are discarded by the sink.
    pub async fn stop(&mut self) {
        let handle = match self.handle.take() {
            Some(h) => h,
            None => return,
        };
        let CaptureHandle {
            mut source,
            pump,
            stopped,
        } = handle;

        stopped.store(true, Ordering::SeqCst);
        if let Err(e) = source.end().await {
            warn!("capture source end reported: {}", e);
        }
        // Dropping the source releases its sink, which closes the delivery
        // channel and lets the pump run off the end.
        drop(source);
        if let Err(e) = pump.await {
            warn!("capture pump task ended abnormally: {}", e);
        }
        info!("capture session stopped");
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

/// Pump task: single owner of the converter state.
///
/// Not-ready buffers kick off their asynchronous fetch and are dropped;
/// extraction is two-pass and fails closed; zero-output conversions vanish.
async fn pump_buffers(
    mut buffers: mpsc::Receiver<Box<dyn SampleBuffer>>,
    frames: mpsc::Sender<NormalizedFrame>,
    stopped: Arc<AtomicBool>,
) {
    let mut normalizer = FormatNormalizer::new();
    while let Some(buffer) = buffers.recv().await {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        let raw = match extract(buffer.as_ref()) {
            Some(r) => r,
            None => continue,
        };
        let frame = match normalizer.normalize(&raw) {
            Some(f) => f,
            None => continue,
        };
        match frames.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("normalized frame dropped on backpressure");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

/// Two-pass extraction of one delivery into an owned planar frame.
///
/// Any probe or copy problem drops the buffer rather than forward a partial
/// frame.
fn extract(buffer: &dyn SampleBuffer) -> Option<RawFrame> {
    if !buffer.is_ready() {
        buffer.request_data();
        debug!("capture buffer not ready, fetch requested");
        return None;
    }

    let size = match buffer.payload_size() {
        Ok(s) => s,
        Err(e) => {
            debug!("payload size probe failed: {}", e);
            return None;
        }
    };
    if size == 0 {
        return None;
    }

    let mut bytes = vec![0u8; size];
    match buffer.copy_payload(&mut bytes) {
        Ok(written) if written == size => {}
        Ok(written) => {
            debug!("short payload copy ({} of {} bytes)", written, size);
            return None;
        }
        Err(e) => {
            debug!("payload copy failed: {}", e);
            return None;
        }
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    RawFrame::from_planar(buffer.format(), buffer.frame_count(), samples)
}

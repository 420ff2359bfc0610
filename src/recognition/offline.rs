// Offline recognition via the local companion process.
//
// Wire protocol on ws://127.0.0.1:{port}:
//   client -> server  JSON text {"type":"start"} / {"type":"stop"},
//                     binary frames of raw little-endian f32 mono 16 kHz audio
//   server -> client  {"type":"ready"},
//                     {"type":"transcript","text":"..."},
//                     {"type":"error","message":"..."}
//
// The companion transcribes each audio batch independently, so this backend
// joins the per-batch texts into one cumulative segment text.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::backend::{BackendError, BackendEvent, RecognitionBackend};
use crate::audio::NormalizedFrame;

/// Audio sent per binary frame, in samples (~3 s, the batch size the
/// companion's model works well with).
const BATCH_SAMPLES: usize = 48_000;

/// Control messages sent to the companion.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Start,
    Stop,
}

/// Status messages received from the companion.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Ready,
    Transcript { text: String },
    Error { message: String },
}

/// Packs normalized samples into the raw f32 wire encoding.
fn f32_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// One offline recognition segment against the companion socket.
pub struct CompanionBackend {
    port: u16,
    audio_tx: Option<mpsc::Sender<NormalizedFrame>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl CompanionBackend {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            audio_tx: None,
            writer: None,
            reader: None,
        }
    }
}

#[async_trait::async_trait]
impl RecognitionBackend for CompanionBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>> {
        let url = format!("ws://127.0.0.1:{}", self.port);
        let (socket, _) = tokio_tungstenite::connect_async(&url)
            .await
            .context("failed to connect to companion")?;
        let (mut sink, mut stream) = socket.split();
        let start = serde_json::to_string(&ClientMessage::Start)?;
        sink.send(Message::Text(start))
            .await
            .context("failed to start companion session")?;
        info!("offline recognition segment connected on {}", url);

        let (event_tx, event_rx) = mpsc::channel(32);
        let (audio_tx, mut audio_rx) = mpsc::channel::<NormalizedFrame>(64);

        let writer = tokio::spawn(async move {
            let mut batch: Vec<f32> = Vec::with_capacity(BATCH_SAMPLES);
            while let Some(frame) = audio_rx.recv().await {
                batch.extend_from_slice(frame.samples());
                if batch.len() < BATCH_SAMPLES {
                    continue;
                }
                if sink.send(Message::Binary(f32_bytes(&batch))).await.is_err() {
                    // Socket gone; the reader reports the failure.
                    return;
                }
                batch.clear();
            }
            // Input ended normally: flush the remainder, then ask the
            // companion to transcribe whatever it still holds.
            if !batch.is_empty() {
                let _ = sink.send(Message::Binary(f32_bytes(&batch))).await;
            }
            if let Ok(stop) = serde_json::to_string(&ClientMessage::Stop) {
                let _ = sink.send(Message::Text(stop)).await;
            }
        });

        let reader = tokio::spawn(async move {
            let mut chunks: Vec<String> = Vec::new();
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::Transcript { text }) => {
                            let trimmed = text.trim();
                            if !trimmed.is_empty() {
                                chunks.push(trimmed.to_string());
                            }
                            let event = BackendEvent::Transcript {
                                text: chunks.join(" "),
                            };
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(ServerMessage::Error { message }) => {
                            warn!("companion reported an error: {}", message);
                            let event = BackendEvent::Error(BackendError::Service(message));
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(ServerMessage::Ready) => debug!("companion acknowledged start"),
                        Err(e) => debug!("unparseable companion message: {}", e),
                    },
                    Ok(Message::Close(_)) | Err(_) => {
                        let event = BackendEvent::Error(BackendError::Service(
                            "companion connection closed".to_string(),
                        ));
                        let _ = event_tx.send(event).await;
                        break;
                    }
                    Ok(_) => {}
                }
            }
        });

        self.audio_tx = Some(audio_tx);
        self.writer = Some(writer);
        self.reader = Some(reader);
        Ok(event_rx)
    }

    fn feed(&mut self, frame: NormalizedFrame) {
        if let Some(tx) = &self.audio_tx {
            if tx.try_send(frame).is_err() {
                debug!("companion backend dropped a frame on backpressure");
            }
        }
    }

    async fn finish(&mut self) {
        self.audio_tx = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
    }

    fn name(&self) -> &str {
        "companion"
    }
}

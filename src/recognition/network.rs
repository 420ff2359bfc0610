// Network recognition backend over NATS.
//
// Audio goes out as base64 16-bit PCM JSON frames on audio.frame.{segment};
// transcripts come back on stt.text.> (partial and final), filtered by
// session id in the payload. The remote service cuts individual streams off
// around sixty seconds, which is why the session layer restarts below that.

use anyhow::{Context, Result};
use base64::Engine;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{BackendError, BackendEvent, RecognitionBackend};
use crate::audio::NormalizedFrame;

/// Audio published per message, in samples (~1 s at the analysis rate).
const PUBLISH_BATCH_SAMPLES: usize = 16_000;

/// Audio frame message published to the recognition service.
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u32,
    /// Base64-encoded 16-bit little-endian PCM.
    pub pcm: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// RFC3339 timestamp.
    pub timestamp: String,
    #[serde(rename = "final")]
    pub final_frame: bool,
}

/// Transcript message received from the recognition service.
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub session_id: String,
    pub text: String,
    pub partial: bool,
    pub timestamp: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Connection settings for the network transport.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub url: String,
    /// Audio publishes go to `{publish_prefix}.{segment_id}`.
    pub publish_prefix: String,
    pub subscribe_subject: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            publish_prefix: "audio.frame".to_string(),
            subscribe_subject: "stt.text.>".to_string(),
        }
    }
}

/// Segment-cumulative text: finalized chunks joined, then the newest partial.
fn cumulative(finals: &[String], partial: Option<&str>) -> String {
    let mut text = finals.join(" ");
    if let Some(partial) = partial {
        if !partial.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(partial);
        }
    }
    text
}

/// Converts normalized samples to the 16-bit wire encoding.
fn pcm_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

async fn publish_frame(
    client: &async_nats::Client,
    subject: &str,
    session_id: &str,
    sequence: u32,
    pcm: &[u8],
    final_frame: bool,
) -> Result<()> {
    let message = AudioFrameMessage {
        session_id: session_id.to_string(),
        sequence,
        pcm: base64::engine::general_purpose::STANDARD.encode(pcm),
        sample_rate: NormalizedFrame::SAMPLE_RATE,
        channels: NormalizedFrame::CHANNELS,
        timestamp: chrono::Utc::now().to_rfc3339(),
        final_frame,
    };
    let payload = serde_json::to_vec(&message)?;
    client
        .publish(subject.to_string(), payload.into())
        .await
        .context("failed to publish audio frame")?;
    Ok(())
}

/// One network recognition segment.
///
/// Connects on start, batches audio into ~1 s publishes, and marks the end
/// of the stream with a final frame on finish.
pub struct NetworkBackend {
    settings: NetworkSettings,
    segment_id: String,
    audio_tx: Option<mpsc::Sender<NormalizedFrame>>,
    publisher: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl NetworkBackend {
    pub fn new(settings: NetworkSettings) -> Self {
        Self {
            settings,
            segment_id: uuid::Uuid::new_v4().to_string(),
            audio_tx: None,
            publisher: None,
            reader: None,
        }
    }
}

#[async_trait::async_trait]
impl RecognitionBackend for NetworkBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>> {
        let client = async_nats::connect(&self.settings.url)
            .await
            .context("failed to connect to NATS")?;
        // Transcripts for every session arrive here; we filter by session id
        // in the payload.
        let mut subscriber = client
            .subscribe(self.settings.subscribe_subject.clone())
            .await
            .context("failed to subscribe to transcripts")?;
        info!("network recognition segment {} connected", self.segment_id);

        let (event_tx, event_rx) = mpsc::channel(32);
        let (audio_tx, mut audio_rx) = mpsc::channel::<NormalizedFrame>(64);

        let segment_id = self.segment_id.clone();
        let transcript_tx = event_tx.clone();
        let reader = tokio::spawn(async move {
            let mut finals: Vec<String> = Vec::new();
            while let Some(msg) = subscriber.next().await {
                let parsed: TranscriptMessage = match serde_json::from_slice(&msg.payload) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("unparseable transcript message: {}", e);
                        continue;
                    }
                };
                if parsed.session_id != segment_id {
                    continue;
                }
                let trimmed = parsed.text.trim();
                let text = if parsed.partial {
                    cumulative(&finals, Some(trimmed))
                } else {
                    if !trimmed.is_empty() {
                        finals.push(trimmed.to_string());
                    }
                    cumulative(&finals, None)
                };
                if transcript_tx
                    .send(BackendEvent::Transcript { text })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let publish_client = client;
        let publish_segment = self.segment_id.clone();
        let subject = format!("{}.{}", self.settings.publish_prefix, self.segment_id);
        let error_tx = event_tx;
        let publisher = tokio::spawn(async move {
            let mut batch: Vec<f32> = Vec::with_capacity(PUBLISH_BATCH_SAMPLES);
            let mut sequence: u32 = 0;
            while let Some(frame) = audio_rx.recv().await {
                batch.extend_from_slice(frame.samples());
                if batch.len() < PUBLISH_BATCH_SAMPLES {
                    continue;
                }
                let pcm = pcm_bytes(&batch);
                batch.clear();
                if let Err(e) = publish_frame(
                    &publish_client,
                    &subject,
                    &publish_segment,
                    sequence,
                    &pcm,
                    false,
                )
                .await
                {
                    warn!("audio publish failed: {}", e);
                    let _ = error_tx
                        .send(BackendEvent::Error(BackendError::Service(e.to_string())))
                        .await;
                    return;
                }
                debug!(
                    "published audio frame {} ({} bytes)",
                    sequence,
                    pcm.len()
                );
                sequence += 1;
            }
            // Input ended normally: flush the remainder and mark the stream
            // finished so the service emits its final transcript.
            if !batch.is_empty() {
                let pcm = pcm_bytes(&batch);
                if let Err(e) = publish_frame(
                    &publish_client,
                    &subject,
                    &publish_segment,
                    sequence,
                    &pcm,
                    false,
                )
                .await
                {
                    debug!("final batch publish failed: {}", e);
                }
                sequence += 1;
            }
            if let Err(e) = publish_frame(
                &publish_client,
                &subject,
                &publish_segment,
                sequence,
                &[],
                true,
            )
            .await
            {
                debug!("final marker publish failed: {}", e);
            }
        });

        self.audio_tx = Some(audio_tx);
        self.publisher = Some(publisher);
        self.reader = Some(reader);
        Ok(event_rx)
    }

    fn feed(&mut self, frame: NormalizedFrame) {
        if let Some(tx) = &self.audio_tx {
            if tx.try_send(frame).is_err() {
                debug!("network backend dropped a frame on backpressure");
            }
        }
    }

    async fn finish(&mut self) {
        // Closing the audio channel lets the publisher flush and send the
        // final marker before it exits.
        self.audio_tx = None;
        if let Some(publisher) = self.publisher.take() {
            let _ = publisher.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
    }

    fn name(&self) -> &str {
        "nats-remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cumulative_joins_finals_then_partial() {
        let finals = vec!["hello there".to_string(), "general".to_string()];
        assert_eq!(cumulative(&finals, None), "hello there general");
        assert_eq!(
            cumulative(&finals, Some("keno")),
            "hello there general keno"
        );
        assert_eq!(cumulative(&[], Some("just a partial")), "just a partial");
        assert_eq!(cumulative(&[], None), "");
    }

    #[test]
    fn test_pcm_bytes_scales_and_clamps() {
        let bytes = pcm_bytes(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values[0], 0);
        assert_eq!(values[1], i16::MAX);
        assert_eq!(values[2], -i16::MAX);
        // Out-of-range input clamps instead of wrapping.
        assert_eq!(values[3], i16::MAX);
    }
}

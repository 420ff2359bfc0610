// WAV-file capture source for batch runs, demos, and platforms without a
// system capture service.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use tokio::task::JoinHandle;
use tracing::info;

use super::frame::AudioFormat;
use super::source::{CaptureConfig, CaptureError, CaptureSource, DeliverySink, SampleBuffer};

/// A fully materialized delivery from the file source.
struct FileBuffer {
    format: AudioFormat,
    frame_count: usize,
    /// Planar samples, channel 0 plane first.
    payload: Vec<f32>,
}

impl SampleBuffer for FileBuffer {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn request_data(&self) {}

    fn payload_size(&self) -> Result<usize, CaptureError> {
        Ok(self.payload.len() * 4)
    }

    fn copy_payload(&self, out: &mut [u8]) -> Result<usize, CaptureError> {
        let mut written = 0;
        for (chunk, sample) in out.chunks_exact_mut(4).zip(&self.payload) {
            chunk.copy_from_slice(&sample.to_le_bytes());
            written += 4;
        }
        Ok(written)
    }
}

/// WAV playback presented as a capture source.
///
/// Deliveries go out in ~100 ms chunks, paced at roughly real time so the
/// rest of the pipeline behaves as it would against the live service. Pacing
/// can be disabled for batch runs.
pub struct FileSource {
    format: AudioFormat,
    /// Interleaved samples for the whole file.
    samples: Vec<f32>,
    paced: bool,
    feeder: Option<JoinHandle<()>>,
}

impl FileSource {
    /// Reads the whole file up front. 8/16/24/32-bit integer and 32-bit
    /// float WAVs are accepted; integer samples are scaled to [-1, 1].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path).context("failed to open WAV file")?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<_, _>>()
                    .context("failed to read WAV samples")?
            }
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .context("failed to read WAV samples")?,
        };

        let format = AudioFormat::new(spec.sample_rate, spec.channels);
        let duration = samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);
        info!(
            "audio file loaded: {:.1}s, {}, {} samples ({})",
            duration,
            format,
            samples.len(),
            path.display()
        );

        Ok(Self {
            format,
            samples,
            paced: true,
            feeder: None,
        })
    }

    /// Disables real-time pacing; deliveries go out as fast as the pipeline
    /// drains them (lossy under backpressure, like any capture source).
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

#[async_trait::async_trait]
impl CaptureSource for FileSource {
    async fn resolve(&mut self) -> Result<(), CaptureError> {
        if self.samples.is_empty() {
            return Err(CaptureError::NoSourceAvailable);
        }
        Ok(())
    }

    async fn configure(&mut self, _config: &CaptureConfig) -> Result<(), CaptureError> {
        // The file dictates its own format; the nominal capture format and
        // the video keep-alive only apply to the live platform service.
        Ok(())
    }

    async fn begin(&mut self, sink: DeliverySink) -> Result<(), CaptureError> {
        let format = self.format;
        let samples = std::mem::take(&mut self.samples);
        let paced = self.paced;

        let feeder = tokio::spawn(async move {
            let channels = format.channels as usize;
            let chunk_frames = (format.sample_rate as usize / 10).max(1);
            for chunk in samples.chunks(chunk_frames * channels) {
                if sink.is_stopped() {
                    break;
                }
                let frame_count = chunk.len() / channels;
                let mut payload = vec![0.0f32; frame_count * channels];
                for (i, s) in chunk.iter().enumerate() {
                    let ch = i % channels;
                    let frame = i / channels;
                    payload[ch * frame_count + frame] = *s;
                }
                sink.deliver(Box::new(FileBuffer {
                    format,
                    frame_count,
                    payload,
                }));
                if paced {
                    tokio::time::sleep(Duration::from_secs_f64(
                        frame_count as f64 / format.sample_rate as f64,
                    ))
                    .await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
        });
        self.feeder = Some(feeder);
        Ok(())
    }

    async fn end(&mut self) -> Result<(), CaptureError> {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
            let _ = feeder.await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;

    fn write_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_open_scales_integer_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 16_000, 1, &[0, 16_384, -16_384, 32_767]);

        let source = FileSource::open(&path).unwrap();
        assert_eq!(source.format(), AudioFormat::new(16_000, 1));
        assert_eq!(source.samples.len(), 4);
        assert!((source.samples[1] - 0.5).abs() < 1e-3);
        assert!((source.samples[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_open_missing_file_fails() {
        assert!(FileSource::open("/nonexistent/audio.wav").is_err());
    }

    #[tokio::test]
    async fn test_empty_file_does_not_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        write_wav(&path, 16_000, 1, &[]);

        let mut source = FileSource::open(&path).unwrap();
        assert!(matches!(
            source.resolve().await,
            Err(CaptureError::NoSourceAvailable)
        ));
    }

    #[tokio::test]
    async fn test_feeder_delivers_planar_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // Interleaved stereo: left channel rising, right channel falling.
        let samples: Vec<i16> = (0..200)
            .flat_map(|i| [i as i16 * 100, -(i as i16) * 100])
            .collect();
        write_wav(&path, 16_000, 2, &samples);

        let mut source = FileSource::open(&path).unwrap().unpaced();
        let (tx, mut rx) = mpsc::channel(16);
        let sink = DeliverySink::new(tx, Arc::new(AtomicBool::new(false)));

        source.resolve().await.unwrap();
        source.begin(sink).await.unwrap();

        let buffer = rx.recv().await.expect("a delivery");
        assert_eq!(buffer.format(), AudioFormat::new(16_000, 2));
        assert!(buffer.is_ready());
        let size = buffer.payload_size().unwrap();
        assert_eq!(size, buffer.frame_count() * 2 * 4);

        source.end().await.unwrap();
    }
}

// End-to-end test for the transcription pipeline
//
// A real WAV file plays through capture and normalization, a canned engine
// supplies the text, and the transcript lands as a markdown file on disk,
// exactly as a live session would leave it.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ambient_scribe::{
    BackendEvent, BackendProvider, ControllerConfig, MarkdownStore, NormalizedFrame,
    PlatformSources, RecognitionBackend, RecognitionMode, SessionCallbacks, SessionController,
    SessionDeps, SourceKind, StaticAuthorizer,
};
use anyhow::Result;
use tokio::sync::mpsc;

/// Engine that reports one fixed transcript and counts the audio it is fed.
struct CannedBackend {
    text: &'static str,
    event_tx: Option<mpsc::Sender<BackendEvent>>,
    fed_samples: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl RecognitionBackend for CannedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>> {
        let (tx, rx) = mpsc::channel(2);
        tx.try_send(BackendEvent::Transcript {
            text: self.text.to_string(),
        })
        .expect("room for the canned transcript");
        self.event_tx = Some(tx);
        Ok(rx)
    }

    fn feed(&mut self, frame: NormalizedFrame) {
        self.fed_samples.fetch_add(frame.len(), Ordering::SeqCst);
    }

    async fn finish(&mut self) {
        self.event_tx = None;
    }

    fn name(&self) -> &str {
        "canned"
    }
}

struct CannedEngines {
    text: &'static str,
    fed_samples: Arc<AtomicUsize>,
}

impl BackendProvider for CannedEngines {
    fn offline_available(&self) -> bool {
        false
    }

    fn make(&self, _mode: RecognitionMode) -> Result<Box<dyn RecognitionBackend>> {
        Ok(Box::new(CannedBackend {
            text: self.text,
            event_tx: None,
            fed_samples: Arc::clone(&self.fed_samples),
        }))
    }
}

/// A short stereo tone at the platform capture rate.
fn write_wav(path: &Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let sample = ((i % 64) as i16 - 32) * 256;
        writer.write_sample(sample).unwrap();
        writer.write_sample(-sample).unwrap();
    }
    writer.finalize().unwrap();
}

#[tokio::test]
async fn test_wav_becomes_a_saved_markdown_transcript() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wav = dir.path().join("speech.wav");
    // 0.3 s of 48 kHz stereo, which normalizes to ~4800 mono samples.
    write_wav(&wav, 14_400);

    let fed_samples = Arc::new(AtomicUsize::new(0));
    let transcripts = dir.path().join("transcripts");
    let controller = SessionController::new(
        ControllerConfig::default(),
        SessionDeps {
            sources: Arc::new(PlatformSources::new(SourceKind::File(wav))),
            engines: Arc::new(CannedEngines {
                text: "the quick brown fox",
                fed_samples: Arc::clone(&fed_samples),
            }),
            authorizer: Arc::new(StaticAuthorizer::allow_all()),
            store: Arc::new(MarkdownStore::new(&transcripts, "scribe")),
        },
        SessionCallbacks::default(),
        false,
    );

    controller.start_listening().await?;

    // The file plays at real time; wait for the text and for the whole file
    // to make it through normalization into the engine.
    let mut ok = false;
    for _ in 0..300 {
        if controller.transcript().await == "the quick brown fox"
            && fed_samples.load(Ordering::SeqCst) >= 4_700
        {
            ok = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(
        ok,
        "pipeline never drained: transcript {:?}, fed {}",
        controller.transcript().await,
        fed_samples.load(Ordering::SeqCst)
    );
    // Resampling 3:1 keeps the sample math exact apart from the stream tail.
    let fed = fed_samples.load(Ordering::SeqCst);
    assert!(
        (4_700..=4_900).contains(&fed),
        "unexpected normalized sample count {}",
        fed
    );

    let path = controller.stop_and_save().await?.expect("a saved transcript");
    assert!(path.starts_with(&transcripts));

    let body = std::fs::read_to_string(&path)?;
    assert!(body.starts_with("# Transcript"));
    assert!(body.contains("- Session: "));
    assert!(body.trim_end().ends_with("the quick brown fox"));
    Ok(())
}

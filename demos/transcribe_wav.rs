// WAV Transcription Example: run the recognition pipeline over a file
//
// The file plays through the same normalize/recognize path as live capture,
// paced at real time, so you can exercise recognition engines without
// speaking into a microphone or granting screen-recording permission.
//
// Prerequisites (at least one recognition path):
// - A companion process listening on ws://127.0.0.1:8765, or
// - A NATS server with an STT worker: docker run -p 4222:4222 nats
//
// Usage: cargo run --example transcribe_wav -- path/to/audio.wav

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ambient_scribe::{
    BackendProvider, Config, EngineProvider, NetworkSettings, PlatformSources, SessionCallbacks,
    SessionController, SessionDeps, SourceKind, StaticAuthorizer,
};
use anyhow::{Context, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let path: PathBuf = std::env::args()
        .nth(1)
        .context("usage: transcribe_wav <file.wav>")?
        .into();

    // Peek at the file up front so we know how long to let it play.
    let reader = hound::WavReader::open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let audio_secs = reader.duration() as f64 / reader.spec().sample_rate as f64;
    drop(reader);
    info!("transcribing {} ({:.1} s of audio)", path.display(), audio_secs);

    let cfg = Config::load("config/ambient-scribe")?;
    let engines = Arc::new(EngineProvider::new(
        cfg.companion.port,
        NetworkSettings {
            url: cfg.network.nats_url.clone(),
            publish_prefix: cfg.network.publish_prefix.clone(),
            subscribe_subject: cfg.network.subscribe_subject.clone(),
        },
    ));
    engines.probe_offline().await;

    let callbacks = SessionCallbacks {
        on_audio: None,
        on_transcript: Some(Box::new(|text: &str| {
            print!("\r{}", text);
            let _ = std::io::Write::flush(&mut std::io::stdout());
        })),
        on_error: Some(Box::new(|message: &str| {
            eprintln!("\nsession error: {}", message);
        })),
    };

    let controller = SessionController::new(
        cfg.controller_config(),
        SessionDeps {
            sources: Arc::new(PlatformSources::new(SourceKind::File(path))),
            engines: Arc::clone(&engines) as Arc<dyn BackendProvider>,
            authorizer: Arc::new(StaticAuthorizer::allow_all()),
            store: Arc::new(cfg.transcripts.store()),
        },
        callbacks,
        false,
    );

    controller.start_listening().await?;

    // The file is paced at real time; give recognition a little slack to
    // return the tail of the transcript before saving.
    tokio::time::sleep(Duration::from_secs_f64(audio_secs + 5.0)).await;
    println!();

    match controller.stop_and_save().await? {
        Some(saved) => info!("transcript saved to {}", saved.display()),
        None => info!("nothing to save"),
    }
    Ok(())
}

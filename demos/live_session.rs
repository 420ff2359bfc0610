// Live Session Example: end-to-end system-audio transcription
//
// This example runs the complete pipeline:
// 1. ScreenCaptureKit captures system audio (48 kHz stereo, audio only)
// 2. The normalizer converts it to 16 kHz mono f32
// 3. Recognition streams it to the companion (offline) or over NATS (network)
// 4. Transcript updates print as they arrive; Ctrl-C stops and saves
//
// IMPORTANT: Requires the macOS Screen Recording permission:
// - System Settings -> Privacy & Security -> Screen Recording -> add Terminal/IDE
//
// Prerequisites (at least one recognition path):
// - A companion process listening on ws://127.0.0.1:8765, or
// - A NATS server with an STT worker: docker run -p 4222:4222 nats
//
// Usage: cargo run --example live_session

use std::sync::Arc;
use std::time::Duration;

use ambient_scribe::{
    BackendProvider, Config, EngineProvider, NetworkSettings, PlatformSources, SessionCallbacks,
    SessionController, SessionDeps, SourceKind, StaticAuthorizer,
};
use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

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
            sources: Arc::new(PlatformSources::new(SourceKind::System)),
            engines: Arc::clone(&engines) as Arc<dyn BackendProvider>,
            authorizer: Arc::new(StaticAuthorizer::allow_all()),
            store: Arc::new(cfg.transcripts.store()),
        },
        callbacks,
        false,
    );

    controller.start_listening().await?;
    info!("listening for system audio; play something and watch the transcript");
    info!("press Ctrl-C to stop and save");

    // Periodic status line so long silences still show progress.
    let status = controller.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(10)).await;
            let stats = status.stats().await;
            info!(
                "[{}] {:.0} s audio, {} transcript chars",
                stats.state, stats.audio_seconds, stats.transcript_chars
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    println!();

    if let Some(path) = controller.stop_and_save().await? {
        info!("transcript saved to {}", path.display());
    }
    Ok(())
}

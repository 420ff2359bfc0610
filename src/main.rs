use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ambient_scribe::companion::{CompanionEvent, CompanionSupervisor};
use ambient_scribe::{
    create_router, AppState, BackendProvider, Config, EngineProvider, FixedPathStore,
    NetworkSettings, PlatformSources, SessionCallbacks, SessionController, SessionDeps,
    SourceKind, StaticAuthorizer, TranscriptStore,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ambient-scribe", version, about = "Continuous system-audio transcription")]
struct Cli {
    /// Configuration file (TOML; the extension may be omitted)
    #[arg(long, global = true, default_value = "config/ambient-scribe")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control surface, supervising the companion if configured
    Serve,
    /// Start a session immediately; Ctrl-C stops and saves
    Record {
        /// Write the transcript to this exact path
        #[arg(long)]
        output: Option<PathBuf>,
        /// Transcribe a WAV file instead of live system audio
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Record { output, input } => record(cfg, output, input).await,
    }
}

fn network_settings(cfg: &Config) -> NetworkSettings {
    NetworkSettings {
        url: cfg.network.nats_url.clone(),
        publish_prefix: cfg.network.publish_prefix.clone(),
        subscribe_subject: cfg.network.subscribe_subject.clone(),
    }
}

async fn serve(cfg: Config) -> Result<()> {
    info!("{} starting", cfg.service.name);

    let engines = Arc::new(EngineProvider::new(cfg.companion.port, network_settings(&cfg)));

    let mut supervisor = None;
    let mut companion_events = None;
    if cfg.companion.autostart {
        let (sup, events) = CompanionSupervisor::spawn(
            &cfg.companion.command,
            &cfg.companion.args,
            engines.offline_ready_flag(),
        )?;
        supervisor = Some(sup);
        companion_events = Some(events);
    } else {
        engines.probe_offline().await;
    }

    let controller = SessionController::new(
        cfg.controller_config(),
        SessionDeps {
            sources: Arc::new(PlatformSources::new(SourceKind::System)),
            engines: Arc::clone(&engines) as Arc<dyn BackendProvider>,
            authorizer: Arc::new(StaticAuthorizer::allow_all()),
            store: Arc::new(cfg.transcripts.store()),
        },
        SessionCallbacks::default(),
        cfg.companion.autostart,
    );

    if let Some(mut events) = companion_events {
        let event_controller = controller.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    CompanionEvent::Ready => event_controller.companion_ready().await,
                    CompanionEvent::Exited { code } => {
                        event_controller.companion_exited(code).await
                    }
                }
            }
        });

        let watchdog = controller.clone();
        let timeout = Duration::from_secs(cfg.companion.ready_timeout_secs);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            watchdog.companion_timed_out().await;
        });
    }

    let app = create_router(AppState::new(controller.clone()));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("HTTP control surface on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Save anything still in flight before the process goes away.
    if let Err(e) = controller.stop_and_save().await {
        warn!("session did not stop cleanly: {}", e);
    }
    if let Some(sup) = supervisor {
        sup.shutdown().await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn record(cfg: Config, output: Option<PathBuf>, input: Option<PathBuf>) -> Result<()> {
    let engines = Arc::new(EngineProvider::new(cfg.companion.port, network_settings(&cfg)));
    // record does not supervise a companion; use one if it is already up.
    engines.probe_offline().await;

    let kind = match input {
        Some(path) => SourceKind::File(path),
        None => SourceKind::System,
    };
    let store: Arc<dyn TranscriptStore> = match output {
        Some(path) => Arc::new(FixedPathStore::new(path)),
        None => Arc::new(cfg.transcripts.store()),
    };

    let callbacks = SessionCallbacks {
        on_audio: None,
        on_transcript: Some(Box::new(|text: &str| {
            print!("\r{}", text);
            let _ = std::io::Write::flush(&mut std::io::stdout());
        })),
        on_error: Some(Box::new(|message: &str| {
            eprintln!("\nerror: {}", message);
        })),
    };

    let controller = SessionController::new(
        cfg.controller_config(),
        SessionDeps {
            sources: Arc::new(PlatformSources::new(kind)),
            engines,
            authorizer: Arc::new(StaticAuthorizer::allow_all()),
            store,
        },
        callbacks,
        false,
    );

    controller.start_listening().await?;
    info!("listening; press Ctrl-C to stop and save");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;
    println!();

    match controller.stop_and_save().await? {
        Some(path) => info!("transcript saved to {}", path.display()),
        None => warn!("no session was active, nothing saved"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

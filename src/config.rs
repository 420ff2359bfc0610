use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audio::{CaptureConfig, VideoKeepalive};
use crate::recognition::RecognitionConfig;
use crate::session::ControllerConfig;
use crate::store::MarkdownStore;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub capture: CaptureSettings,
    pub recognition: RecognitionSettings,
    pub network: NetworkConfig,
    pub companion: CompanionConfig,
    pub transcripts: TranscriptsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "ambient-scribe".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Nominal rate requested from the platform; recognition always sees
    /// 16 kHz regardless.
    pub sample_rate: u32,
    pub channels: u16,
    pub exclude_current_process: bool,
    pub keepalive_width: u32,
    pub keepalive_height: u32,
    pub keepalive_fps: u32,
    pub permission_grace_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let base = CaptureConfig::default();
        Self {
            sample_rate: base.sample_rate,
            channels: base.channels,
            exclude_current_process: base.exclude_current_process,
            keepalive_width: base.video_keepalive.width,
            keepalive_height: base.video_keepalive.height,
            keepalive_fps: base.video_keepalive.frames_per_second,
            permission_grace_ms: base.permission_grace.as_millis() as u64,
        }
    }
}

impl CaptureSettings {
    pub fn to_capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            exclude_current_process: self.exclude_current_process,
            video_keepalive: VideoKeepalive {
                width: self.keepalive_width,
                height: self.keepalive_height,
                frames_per_second: self.keepalive_fps,
            },
            permission_grace: Duration::from_millis(self.permission_grace_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    pub locale: String,
    /// Restart network segments this many seconds in.
    pub restart_secs: u64,
    /// Delay between segments, in milliseconds.
    pub teardown_ms: u64,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        let base = RecognitionConfig::default();
        Self {
            locale: base.locale,
            restart_secs: base.segment_limit.as_secs(),
            teardown_ms: base.teardown_delay.as_millis() as u64,
        }
    }
}

impl RecognitionSettings {
    pub fn to_recognition_config(&self) -> RecognitionConfig {
        RecognitionConfig {
            locale: self.locale.clone(),
            segment_limit: Duration::from_secs(self.restart_secs),
            teardown_delay: Duration::from_millis(self.teardown_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub nats_url: String,
    /// Audio publishes go to `{publish_prefix}.{session_id}`.
    pub publish_prefix: String,
    pub subscribe_subject: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            publish_prefix: "audio.frame".to_string(),
            subscribe_subject: "stt.text.>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Spawn and supervise the companion process ourselves.
    pub autostart: bool,
    pub command: String,
    pub args: Vec<String>,
    pub port: u16,
    pub ready_timeout_secs: u64,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            autostart: false,
            command: "python3".to_string(),
            // -u keeps stdout unbuffered so the READY line arrives promptly.
            args: vec!["-u".to_string(), "companion/server.py".to_string()],
            port: 8765,
            ready_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptsConfig {
    /// Output directory; `~` expands to the home directory.
    pub directory: String,
    pub prefix: String,
}

impl Default for TranscriptsConfig {
    fn default() -> Self {
        Self {
            directory: "~/Documents/Transcripts".to_string(),
            prefix: "transcript".to_string(),
        }
    }
}

impl TranscriptsConfig {
    pub fn store(&self) -> MarkdownStore {
        let expanded = shellexpand::tilde(&self.directory).into_owned();
        MarkdownStore::new(PathBuf::from(expanded), self.prefix.clone())
    }
}

impl Config {
    /// Loads from a TOML file; a missing file yields the defaults.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("invalid configuration")
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            capture: self.capture.to_capture_config(),
            recognition: self.recognition.to_recognition_config(),
            ..ControllerConfig::default()
        }
    }
}

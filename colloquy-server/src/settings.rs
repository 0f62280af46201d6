//! Server settings (JSON file, camelCase keys, `COLLOQUY_*` env overrides).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use colloquy_core::SessionConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ServerSettings {
    /// Socket address the HTTP/WebSocket listener binds to.
    pub bind_address: String,
    /// Deadline for the recognizer to confirm a stop, in seconds.
    pub engine_stop_timeout_secs: u64,
    /// Capacity of the per-session transcript event queue.
    pub transcript_queue_capacity: usize,
    /// Audio chunk size the stub synthesizer emits, in bytes.
    pub synthesis_chunk_size: usize,
    /// Deltas the stub answer engine replays for every utterance.
    pub stub_answer_deltas: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7700".into(),
            engine_stop_timeout_secs: 10,
            transcript_queue_capacity: 256,
            synthesis_chunk_size: 32 * 1024,
            stub_answer_deltas: vec!["I heard you.".into()],
        }
    }
}

impl ServerSettings {
    pub fn normalize(&mut self) {
        let trimmed = self.bind_address.trim();
        self.bind_address = if trimmed.is_empty() {
            ServerSettings::default().bind_address
        } else {
            trimmed.to_string()
        };
        self.engine_stop_timeout_secs = self.engine_stop_timeout_secs.clamp(1, 120);
        self.transcript_queue_capacity = self.transcript_queue_capacity.clamp(16, 4096);
        self.synthesis_chunk_size = self.synthesis_chunk_size.clamp(1024, 1024 * 1024);
        self.stub_answer_deltas.retain(|d| !d.trim().is_empty());
        if self.stub_answer_deltas.is_empty() {
            self.stub_answer_deltas = ServerSettings::default().stub_answer_deltas;
        }
    }

    /// Apply `COLLOQUY_*` overrides through a lookup, so tests can inject
    /// values without touching the process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("COLLOQUY_BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Some(secs) = lookup("COLLOQUY_ENGINE_STOP_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.engine_stop_timeout_secs = secs;
        }
        if let Some(capacity) = lookup("COLLOQUY_TRANSCRIPT_QUEUE_CAPACITY")
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.transcript_queue_capacity = capacity;
        }
        if let Some(size) =
            lookup("COLLOQUY_SYNTHESIS_CHUNK_SIZE").and_then(|v| v.parse::<usize>().ok())
        {
            self.synthesis_chunk_size = size;
        }
        self.normalize();
    }

    /// Map onto the core session config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            transcript_queue_capacity: self.transcript_queue_capacity,
            engine_stop_timeout: Duration::from_secs(self.engine_stop_timeout_secs),
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Colloquy")
            .join("server.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("colloquy")
            .join("server.json")
    }
}

/// Load settings from `path`, falling back to defaults on a missing or
/// unparsable file, then normalize.
pub fn load_settings(path: &Path) -> ServerSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<ServerSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

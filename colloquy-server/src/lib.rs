//! Host-side plumbing for the Colloquy WebSocket server: settings loading
//! and the axum endpoint. The binary in `main.rs` wires these together;
//! integration tests drive the same router on an ephemeral port.

pub mod settings;
pub mod ws;

use std::sync::Arc;

use colloquy_core::engines::stub::{
    StubAnswerEngine, StubRecognitionEngine, StubSynthesisEngine,
};
use colloquy_core::SessionEngines;

use settings::ServerSettings;

/// Build the stub collaborator set from server settings.
///
/// Production deployments replace this with real engine adapters; the stubs
/// keep the full pipeline runnable with no external services.
pub fn stub_engines_from_settings(settings: &ServerSettings) -> SessionEngines {
    SessionEngines {
        recognition: Arc::new(StubRecognitionEngine::new()),
        answer: Arc::new(StubAnswerEngine::new(settings.stub_answer_deltas.clone())),
        synthesis: Arc::new(StubSynthesisEngine::new(settings.synthesis_chunk_size)),
        analysis: None,
    }
}

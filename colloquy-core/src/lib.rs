//! # colloquy-core
//!
//! Reusable streaming-conversation orchestration SDK.
//!
//! ## Architecture
//!
//! ```text
//! Transport ──► TranscriptSink ──► TranscriptDrain ──► ComposedUtterance
//!   (audio)       (callback thread → bounded queue → async drain)
//!                                                          │
//!                                              Conversation::submit_utterance
//!                                                          │ text deltas
//!                                               SentenceSegmenter
//!                                                          │ sentences (seq 0, 1, …)
//!                                              SynthesisDispatcher (fan-out)
//!                                                          │ per-sequence outcomes
//!                                               OrderingBuffer (watermark)
//!                                                          │ in-order audio frames
//!                                                      Transport
//! ```
//!
//! The [`session::SessionOrchestrator`] wires one instance of each component
//! per duplex connection and owns the lifecycle state machine. External
//! speech and language capabilities enter through the trait objects in
//! [`engines`]; deterministic stubs in [`engines::stub`] run the whole
//! pipeline without any external service.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod engines;
pub mod error;
pub mod protocol;
pub mod session;

// Convenience re-exports for downstream crates
pub use engines::{
    AnalysisEngine, AnswerEngine, Conversation, RecognitionEngine, RecognitionStream,
    SynthesisEngine, TranscriptEvent,
};
pub use error::ColloquyError;
pub use protocol::{Command, FrameSink, InboundFrame, OutboundFrame};
pub use session::{
    DiagnosticsSnapshot, SessionConfig, SessionEngines, SessionOrchestrator, SessionState,
};

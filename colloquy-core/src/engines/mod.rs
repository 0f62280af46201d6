//! External collaborator abstractions.
//!
//! The pipeline never talks to a concrete speech or language backend. Each
//! of the four collaborators is a trait object injected at session
//! construction, so swapping a cloud recognizer for the in-crate stubs (or a
//! test double) never touches orchestration code.
//!
//! `&mut self` on the stream/conversation traits intentionally expresses
//! that those handles are stateful and session-owned: one recognition
//! stream per listening phase, one conversation per turn.

pub mod stub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::session::aggregator::TranscriptSink;

/// One event from the recognition engine's callback context.
///
/// Serde-derived so host applications can mirror events onto their own
/// buses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TranscriptEvent {
    /// Low-latency hypothesis; superseded by later events.
    Partial { text: String },
    /// Committed transcript segment.
    Final { text: String },
    /// The engine confirmed a clean stop; no further events follow.
    SessionStopped,
    /// The engine aborted; transcript is best-effort from here.
    Canceled { reason: String },
}

impl TranscriptEvent {
    /// True for the two lifecycle variants that end a recognition pass.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TranscriptEvent::SessionStopped | TranscriptEvent::Canceled { .. }
        )
    }
}

/// Factory for per-session recognition streams.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Open a fresh continuous-recognition stream for one listening phase.
    ///
    /// Events are delivered through `sink` from whatever execution context
    /// the engine uses internally; [`TranscriptSink::push`] is non-blocking
    /// and safe to call from foreign threads.
    async fn open_stream(&self, sink: TranscriptSink) -> Result<Box<dyn RecognitionStream>>;
}

/// One continuous-recognition pass.
#[async_trait]
pub trait RecognitionStream: Send {
    /// Begin continuous recognition. Events may arrive any time after this.
    async fn start(&mut self) -> Result<()>;

    /// Request a stop. The engine flushes pending segments and then emits
    /// `SessionStopped` (or `Canceled`) through the sink.
    async fn stop(&mut self) -> Result<()>;

    /// Feed raw audio bytes into the engine's input stream.
    async fn push_audio(&mut self, bytes: &[u8]) -> Result<()>;

    /// Release engine resources. Called once during teardown, after `stop`.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for isolated answer conversations.
///
/// One engine instance may serve many concurrent sessions; each session gets
/// its own conversation context so utterances never interleave.
#[async_trait]
pub trait AnswerEngine: Send + Sync {
    async fn open_conversation(&self) -> Result<Box<dyn Conversation>>;
}

/// A single answer exchange within an isolated conversation context.
#[async_trait]
pub trait Conversation: Send {
    /// Stream the answer to `utterance` as text deltas, in order, into
    /// `deltas`. Returning (dropping the sender) is the generation-complete
    /// signal.
    ///
    /// # Errors
    /// An error fails the current turn: the caller reports it and cancels
    /// synthesis already in flight.
    async fn submit_utterance(
        &mut self,
        utterance: &str,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<()>;
}

/// Text-to-speech collaborator.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Synthesize one sentence into an ordered group of audio chunks.
    ///
    /// # Errors
    /// A per-sentence failure: the sentence contributes no audio and other
    /// sentences are unaffected.
    async fn synthesize(&self, sentence: &str) -> Result<Vec<Vec<u8>>>;
}

/// Optional utterance-analysis collaborator (`ANALYSIS:` frames).
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(&self, utterance: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_event_serializes_tagged() {
        let event = TranscriptEvent::Partial {
            text: "hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"partial","text":"hello"}"#);

        let event = TranscriptEvent::SessionStopped;
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"sessionStopped"}"#);
    }

    #[test]
    fn transcript_event_round_trips() {
        let events = vec![
            TranscriptEvent::Partial { text: "he".into() },
            TranscriptEvent::Final {
                text: "hello world".into(),
            },
            TranscriptEvent::Canceled {
                reason: "network".into(),
            },
            TranscriptEvent::SessionStopped,
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: TranscriptEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }

    #[test]
    fn terminal_variants_are_flagged() {
        assert!(TranscriptEvent::SessionStopped.is_terminal());
        assert!(TranscriptEvent::Canceled {
            reason: "x".into()
        }
        .is_terminal());
        assert!(!TranscriptEvent::Partial { text: "x".into() }.is_terminal());
        assert!(!TranscriptEvent::Final { text: "x".into() }.is_terminal());
    }
}

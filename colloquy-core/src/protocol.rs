//! Wire protocol for the duplex conversation channel.
//!
//! Text frames carry commands inbound and status markers outbound; binary
//! frames carry raw audio in both directions. Marker strings are part of the
//! public wire contract and must not change shape — clients match on the
//! `PREFIX: ` form byte-for-byte.

use tokio::sync::mpsc;

use crate::error::{ColloquyError, Result};

/// Client-issued text commands recognized while a session is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop listening, abort the transcript, skip answer and synthesis.
    StopDiscard,
    /// Stop listening, compose the transcript, answer and synthesize it.
    StopProcess,
    /// Listening-phase synonym for a discard-style stop.
    ChunksDone,
}

impl Command {
    /// Parse an inbound text frame. Returns `None` for unrecognized text,
    /// which callers log and ignore.
    pub fn parse(raw: &str) -> Option<Command> {
        match raw {
            "STOP_DISCARD" => Some(Command::StopDiscard),
            "STOP_PROCESS" => Some(Command::StopProcess),
            "CHUNKS_DONE" => Some(Command::ChunksDone),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::StopDiscard => "STOP_DISCARD",
            Command::StopProcess => "STOP_PROCESS",
            Command::ChunksDone => "CHUNKS_DONE",
        }
    }
}

/// One frame received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text frame; commands are parsed out of it with [`Command::parse`].
    Text(String),
    /// Raw audio bytes. An empty payload means end-of-audio-stream.
    Binary(Vec<u8>),
}

/// One frame to be written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Partial transcript status.
    Partial(String),
    /// Final transcript segment status.
    Final(String),
    /// The composed utterance after a stop-and-process.
    CompleteTranscription(String),
    /// Analysis collaborator output (only when one is configured).
    Analysis(String),
    /// Answer-engine or per-sentence synthesis failure.
    Error(String),
    /// End of the synthesized audio stream for this turn.
    ChunkComplete,
    /// Final marker before the transport closes.
    Done,
    /// Synthesized audio chunk bytes, already in flush order.
    Audio(Vec<u8>),
}

impl OutboundFrame {
    /// Wire encoding for text frames. `None` for binary audio.
    pub fn to_text(&self) -> Option<String> {
        match self {
            OutboundFrame::Partial(text) => Some(format!("PARTIAL: {text}")),
            OutboundFrame::Final(text) => Some(format!("FINAL: {text}")),
            OutboundFrame::CompleteTranscription(text) => {
                Some(format!("COMPLETE_TRANSCRIPTION: {text}"))
            }
            OutboundFrame::Analysis(text) => Some(format!("ANALYSIS: {text}")),
            OutboundFrame::Error(message) => Some(format!("ERROR: {message}")),
            OutboundFrame::ChunkComplete => Some("CHUNK_COMPLETE".to_string()),
            OutboundFrame::Done => Some("DONE".to_string()),
            OutboundFrame::Audio(_) => None,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, OutboundFrame::Audio(_))
    }
}

/// Write handle to the transport's outbound side.
///
/// Cheap to clone; every component that emits frames holds one. The receiving
/// half is drained by the host's writer task (or a test harness). A closed
/// receiver means the transport is gone, surfaced as
/// [`ColloquyError::Transport`].
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl FrameSink {
    /// Create a sink and the receiver the transport writer drains.
    pub fn channel() -> (FrameSink, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FrameSink { tx }, rx)
    }

    /// Queue one frame for writing.
    ///
    /// # Errors
    /// `ColloquyError::Transport` if the writer side has gone away.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| ColloquyError::Transport("outbound frame channel closed".to_string()))
    }

    /// True once the transport writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

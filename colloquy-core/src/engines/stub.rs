//! Deterministic stub collaborators.
//!
//! They let the full server run end-to-end with no external speech or
//! language services, and they drive the test suite: recognition events are
//! scripted or derived from the byte count pushed, answers replay configured
//! deltas, and synthesis renders predictable bytes with optional latency and
//! failure injection.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engines::{
    AnalysisEngine, AnswerEngine, Conversation, RecognitionEngine, RecognitionStream,
    SynthesisEngine, TranscriptEvent,
};
use crate::error::{ColloquyError, Result};
use crate::session::aggregator::TranscriptSink;

/// Default synthesis chunk size: 32 KiB.
pub const DEFAULT_SYNTHESIS_CHUNK_SIZE: usize = 32 * 1024;

/// Recognition stub.
///
/// Unscripted, a stop emits one final transcript derived from the number of
/// audio bytes pushed. Scripted, a stop replays the configured events. Either
/// way delivery happens from a dedicated OS thread, exercising the same
/// foreign-callback path a real engine uses.
#[derive(Default)]
pub struct StubRecognitionEngine {
    script: Option<Vec<TranscriptEvent>>,
}

impl StubRecognitionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `events` on stop. A terminal event (`SessionStopped` or
    /// `Canceled`) is appended when the script lacks one.
    pub fn scripted(events: Vec<TranscriptEvent>) -> Self {
        Self {
            script: Some(events),
        }
    }
}

#[async_trait]
impl RecognitionEngine for StubRecognitionEngine {
    async fn open_stream(&self, sink: TranscriptSink) -> Result<Box<dyn RecognitionStream>> {
        Ok(Box::new(StubRecognitionStream {
            sink,
            script: self.script.clone(),
            bytes_pushed: 0,
            started: false,
        }))
    }
}

struct StubRecognitionStream {
    sink: TranscriptSink,
    script: Option<Vec<TranscriptEvent>>,
    bytes_pushed: usize,
    started: bool,
}

#[async_trait]
impl RecognitionStream for StubRecognitionStream {
    async fn start(&mut self) -> Result<()> {
        debug!("stub recognition started");
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;

        let mut events = match self.script.clone() {
            Some(events) => events,
            None => vec![TranscriptEvent::Final {
                text: format!("[heard {} bytes]", self.bytes_pushed),
            }],
        };
        if !events.iter().any(TranscriptEvent::is_terminal) {
            events.push(TranscriptEvent::SessionStopped);
        }

        let sink = self.sink.clone();
        thread::spawn(move || {
            for event in events {
                sink.push(event);
            }
        });
        Ok(())
    }

    async fn push_audio(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes_pushed += bytes.len();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        debug!(bytes_pushed = self.bytes_pushed, "stub recognition closed");
        Ok(())
    }
}

/// Answer stub: every conversation replays the same configured deltas.
pub struct StubAnswerEngine {
    deltas: Vec<String>,
    fail_with: Option<String>,
}

impl StubAnswerEngine {
    pub fn new(deltas: Vec<String>) -> Self {
        Self {
            deltas,
            fail_with: None,
        }
    }

    /// Every `submit_utterance` fails with `message` after emitting the
    /// configured deltas (an engine can fault mid-stream).
    pub fn failing(deltas: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            deltas,
            fail_with: Some(message.into()),
        }
    }
}

#[async_trait]
impl AnswerEngine for StubAnswerEngine {
    async fn open_conversation(&self) -> Result<Box<dyn Conversation>> {
        Ok(Box::new(StubConversation {
            deltas: self.deltas.clone(),
            fail_with: self.fail_with.clone(),
        }))
    }
}

struct StubConversation {
    deltas: Vec<String>,
    fail_with: Option<String>,
}

#[async_trait]
impl Conversation for StubConversation {
    async fn submit_utterance(
        &mut self,
        utterance: &str,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        debug!(utterance_len = utterance.len(), "stub answer generating");
        for delta in &self.deltas {
            if deltas.send(delta.clone()).is_err() {
                // Consumer gone (barge-in); stop generating.
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
        if let Some(message) = &self.fail_with {
            return Err(ColloquyError::Answer(message.clone()));
        }
        Ok(())
    }
}

/// Synthesis stub: renders each sentence's UTF-8 bytes, split into
/// fixed-size chunks. Per-sentence latency and failure injection make
/// ordering races reproducible in tests.
pub struct StubSynthesisEngine {
    chunk_size: usize,
    latencies: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashMap<String, String>>,
}

impl StubSynthesisEngine {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            latencies: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_latency(self, sentence: impl Into<String>, delay: Duration) -> Self {
        self.latencies.lock().insert(sentence.into(), delay);
        self
    }

    pub fn with_failure(self, sentence: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.lock().insert(sentence.into(), message.into());
        self
    }
}

impl Default for StubSynthesisEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SYNTHESIS_CHUNK_SIZE)
    }
}

#[async_trait]
impl SynthesisEngine for StubSynthesisEngine {
    async fn synthesize(&self, sentence: &str) -> Result<Vec<Vec<u8>>> {
        let delay = self.latencies.lock().get(sentence).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().get(sentence).cloned();
        if let Some(message) = failure {
            return Err(ColloquyError::Other(anyhow::anyhow!(message)));
        }

        let chunks = sentence
            .as_bytes()
            .chunks(self.chunk_size)
            .map(<[u8]>::to_vec)
            .collect::<Vec<_>>();
        debug!(
            sentence_len = sentence.len(),
            chunks = chunks.len(),
            "stub synthesis rendered"
        );
        Ok(chunks)
    }
}

/// Analysis stub: reports the utterance word count.
#[derive(Default)]
pub struct StubAnalysisEngine;

#[async_trait]
impl AnalysisEngine for StubAnalysisEngine {
    async fn analyze(&self, utterance: &str) -> Result<String> {
        Ok(format!(
            "{} words",
            utterance.split_whitespace().count()
        ))
    }
}

/// Convenience: Arc the stubs into a [`SessionEngines`] set.
///
/// [`SessionEngines`]: crate::session::SessionEngines
pub fn stub_engines(
    recognition: StubRecognitionEngine,
    answer: StubAnswerEngine,
    synthesis: StubSynthesisEngine,
) -> crate::session::SessionEngines {
    crate::session::SessionEngines {
        recognition: Arc::new(recognition),
        answer: Arc::new(answer),
        synthesis: Arc::new(synthesis),
        analysis: None,
    }
}

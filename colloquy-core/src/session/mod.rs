//! Per-connection session orchestration.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle → Listening → Stopping{Discard|Process} → Answering → Synthesizing
//!      → Draining → Closed
//! ```
//!
//! One [`SessionOrchestrator`] per duplex connection. It wires the transcript
//! aggregator, sentence segmenter, synthesis dispatcher, and ordering buffer
//! together, and owns the shutdown protocol: every path through the state
//! machine ends in `Draining` (emit `DONE`, close) or — on disconnect — in
//! `Closed` with no further writes attempted.

pub mod aggregator;
pub mod dispatcher;
pub mod ordering;
pub mod segmenter;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::engines::{AnalysisEngine, AnswerEngine, RecognitionEngine, SynthesisEngine};
use crate::error::{ColloquyError, Result};
use crate::protocol::{Command, FrameSink, InboundFrame, OutboundFrame};

use aggregator::{transcript_channel, AggregationOutcome};
use dispatcher::SynthesisDispatcher;
use ordering::OrderingBuffer;
use segmenter::SentenceSegmenter;

/// Process-wide session id counter.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Tuning knobs for one session. Plain struct; hosts map their own settings
/// onto it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the recognition-callback event queue. Default: 256.
    pub transcript_queue_capacity: usize,
    /// How long to wait for the recognizer to confirm a stop before
    /// proceeding best-effort. Default: 10 s.
    pub engine_stop_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transcript_queue_capacity: aggregator::DEFAULT_TRANSCRIPT_QUEUE_CAPACITY,
            engine_stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Stopping(StopMode),
    Answering,
    Synthesizing,
    Draining,
    Closed,
}

/// How a listening phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Abort the transcript; no answer, no synthesis.
    Discard,
    /// Compose the transcript and answer it.
    Process,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Stopping(StopMode::Discard) => "stopping_discard",
            SessionState::Stopping(StopMode::Process) => "stopping_process",
            SessionState::Answering => "answering",
            SessionState::Synthesizing => "synthesizing",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        }
    }
}

/// Per-session counters, logged at session end.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub audio_bytes_in: AtomicUsize,
    pub transcript_events_forwarded: AtomicUsize,
    pub transcript_events_dropped: AtomicUsize,
    pub sentences_closed: AtomicUsize,
    pub synthesis_failures: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            audio_bytes_in: self.audio_bytes_in.load(Ordering::Relaxed),
            transcript_events_forwarded: self.transcript_events_forwarded.load(Ordering::Relaxed),
            transcript_events_dropped: self.transcript_events_dropped.load(Ordering::Relaxed),
            sentences_closed: self.sentences_closed.load(Ordering::Relaxed),
            synthesis_failures: self.synthesis_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub audio_bytes_in: usize,
    pub transcript_events_forwarded: usize,
    pub transcript_events_dropped: usize,
    pub sentences_closed: usize,
    pub synthesis_failures: usize,
}

/// The collaborator set injected at session construction.
///
/// Engines are shared across sessions; isolation comes from the per-session
/// handles they hand out (`open_stream`, `open_conversation`).
#[derive(Clone)]
pub struct SessionEngines {
    pub recognition: Arc<dyn RecognitionEngine>,
    pub answer: Arc<dyn AnswerEngine>,
    pub synthesis: Arc<dyn SynthesisEngine>,
    pub analysis: Option<Arc<dyn AnalysisEngine>>,
}

/// How one phase of the session asked to continue.
enum Next {
    Drain,
    Disconnected,
}

/// One duplex conversation, from accept to close.
pub struct SessionOrchestrator {
    id: u64,
    config: SessionConfig,
    engines: SessionEngines,
    frames: FrameSink,
    state: SessionState,
    diagnostics: Arc<SessionDiagnostics>,
}

impl SessionOrchestrator {
    pub fn new(config: SessionConfig, engines: SessionEngines, frames: FrameSink) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            engines,
            frames,
            state: SessionState::Idle,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn diagnostics(&self) -> Arc<SessionDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    /// Drive the session until the transport closes or the turn completes.
    ///
    /// Consumes the orchestrator: one connection, one run. Inbound frames
    /// arrive on `inbound`; a closed channel is the disconnect signal.
    ///
    /// # Errors
    /// Only transport-level failures propagate. Recognition, answer, and
    /// synthesis failures are contained at their component boundary and end
    /// the turn through the normal drain path.
    pub async fn run(mut self, inbound: mpsc::Receiver<InboundFrame>) -> Result<()> {
        let span = info_span!("session", session_id = self.id);
        async move {
            let result = self.run_inner(inbound).await;
            let snapshot = self.diagnostics.snapshot();
            info!(
                state = self.state.name(),
                audio_bytes_in = snapshot.audio_bytes_in,
                transcript_events_forwarded = snapshot.transcript_events_forwarded,
                transcript_events_dropped = snapshot.transcript_events_dropped,
                sentences_closed = snapshot.sentences_closed,
                synthesis_failures = snapshot.synthesis_failures,
                "session ended"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn run_inner(&mut self, mut inbound: mpsc::Receiver<InboundFrame>) -> Result<()> {
        // Idle → Listening: register the callback sink, start recognition.
        let (sink, drain) = transcript_channel(self.config.transcript_queue_capacity);
        let sink_for_drop_count = sink.clone();
        let mut stream = self.engines.recognition.open_stream(sink).await?;
        stream.start().await?;
        self.set_state(SessionState::Listening);

        let drain_frames = self.frames.clone();
        let mut drain_task = tokio::spawn(async move { drain.drain(&drain_frames).await });

        // Listening: forward audio until a stop command or disconnect.
        let stop_mode = loop {
            match inbound.recv().await {
                None => {
                    info!("client disconnected while listening");
                    drain_task.abort();
                    let _ = stream.stop().await;
                    let _ = stream.close().await;
                    self.set_state(SessionState::Closed);
                    return Ok(());
                }
                Some(InboundFrame::Binary(bytes)) if bytes.is_empty() => {
                    debug!("end-of-audio sentinel received");
                    break StopMode::Discard;
                }
                Some(InboundFrame::Binary(bytes)) => {
                    self.diagnostics
                        .audio_bytes_in
                        .fetch_add(bytes.len(), Ordering::Relaxed);
                    if let Err(err) = stream.push_audio(&bytes).await {
                        warn!(error = %err, "recognizer rejected audio, continuing");
                    }
                }
                Some(InboundFrame::Text(text)) => match Command::parse(&text) {
                    Some(Command::StopProcess) => break StopMode::Process,
                    Some(Command::StopDiscard) | Some(Command::ChunksDone) => {
                        break StopMode::Discard
                    }
                    None => warn!(command = %text, "unrecognized text command ignored"),
                },
            }
        };

        // Stopping: flush the recognizer and collect the aggregation outcome.
        self.set_state(SessionState::Stopping(stop_mode));
        if let Err(err) = stream.stop().await {
            warn!(error = %err, "recognizer stop failed, awaiting drain anyway");
        }

        let outcome = match timeout(self.config.engine_stop_timeout, &mut drain_task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                error!(error = %join_err, "transcript drain task failed");
                AggregationOutcome::new(Vec::new(), Some("drain task failed".into()), 0)
            }
            Err(_) => {
                let err = ColloquyError::EngineStopTimeout(self.config.engine_stop_timeout);
                warn!(error = %err, "proceeding without a confirmed stop");
                drain_task.abort();
                AggregationOutcome::new(Vec::new(), Some(err.to_string()), 0)
            }
        };
        if let Err(err) = stream.close().await {
            warn!(error = %err, "recognizer close failed");
        }
        drop(stream);

        self.diagnostics
            .transcript_events_forwarded
            .fetch_add(outcome.events_forwarded, Ordering::Relaxed);
        self.diagnostics
            .transcript_events_dropped
            .fetch_add(sink_for_drop_count.dropped(), Ordering::Relaxed);
        if let Some(reason) = &outcome.canceled {
            // Non-fatal: the composed transcript is still best-effort usable.
            warn!(%reason, "recognition ended abnormally");
        }

        let next = match stop_mode {
            StopMode::Discard => {
                debug!("discard stop, skipping answer and synthesis");
                Next::Drain
            }
            StopMode::Process => self.answer_turn(&mut inbound, &outcome).await,
        };

        match next {
            Next::Drain => {
                self.set_state(SessionState::Draining);
                if self.frames.send(OutboundFrame::Done).is_err() {
                    debug!("transport gone before DONE marker");
                }
                self.set_state(SessionState::Closed);
                Ok(())
            }
            Next::Disconnected => {
                self.set_state(SessionState::Closed);
                Ok(())
            }
        }
    }

    /// Stopping(Process) → Answering → Synthesizing. Every failure inside
    /// this turn is contained and funneled into the drain path.
    async fn answer_turn(
        &mut self,
        inbound: &mut mpsc::Receiver<InboundFrame>,
        outcome: &AggregationOutcome,
    ) -> Next {
        let utterance = outcome.composed_utterance();
        if self
            .frames
            .send(OutboundFrame::CompleteTranscription(utterance.to_string()))
            .is_err()
        {
            return Next::Disconnected;
        }
        if utterance.is_empty() {
            debug!("composed utterance is empty, nothing to answer");
            return Next::Drain;
        }

        if let Some(analysis) = &self.engines.analysis {
            match analysis.analyze(utterance).await {
                Ok(text) => {
                    let _ = self.frames.send(OutboundFrame::Analysis(text));
                }
                Err(err) => warn!(error = %err, "analysis failed, skipping frame"),
            }
        }

        self.set_state(SessionState::Answering);

        let mut conversation = match self.engines.answer.open_conversation().await {
            Ok(conversation) => conversation,
            Err(err) => {
                error!(error = %err, "failed to open answer conversation");
                let _ = self.frames.send(OutboundFrame::Error(err.to_string()));
                return Next::Drain;
            }
        };

        let buffer = Arc::new(OrderingBuffer::new(self.frames.clone()));
        let dispatcher = SynthesisDispatcher::new(
            Arc::clone(&self.engines.synthesis),
            Arc::clone(&buffer),
        );

        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel::<String>();
        let generation = {
            let utterance = utterance.to_owned();
            tokio::spawn(async move { conversation.submit_utterance(&utterance, delta_tx).await })
        };

        let mut segmenter = SentenceSegmenter::new();

        // Consume deltas while watching the transport for barge-in/disconnect.
        loop {
            tokio::select! {
                delta = delta_rx.recv() => match delta {
                    Some(delta) => {
                        for sentence in segmenter.push_delta(&delta) {
                            debug!(sequence = sentence.sequence, "sentence closed");
                            self.diagnostics
                                .sentences_closed
                                .fetch_add(1, Ordering::Relaxed);
                            dispatcher.dispatch(sentence);
                        }
                    }
                    // Sender dropped: generation finished or failed.
                    None => break,
                },
                frame = inbound.recv() => match frame {
                    None => {
                        info!("client disconnected during answering");
                        generation.abort();
                        dispatcher.cancel_all();
                        buffer.release();
                        return Next::Disconnected;
                    }
                    Some(InboundFrame::Text(text))
                        if matches!(Command::parse(&text), Some(Command::StopDiscard)) =>
                    {
                        info!("barge-in during answering, canceling turn");
                        generation.abort();
                        dispatcher.cancel_all();
                        buffer.release();
                        return Next::Drain;
                    }
                    Some(frame) => debug!(?frame, "inbound frame ignored during answering"),
                },
            }
        }

        match generation.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "answer generation failed");
                let _ = self.frames.send(OutboundFrame::Error(err.to_string()));
                dispatcher.cancel_all();
                buffer.release();
                return Next::Drain;
            }
            Err(join_err) => {
                error!(error = %join_err, "answer generation task died");
                let _ = self
                    .frames
                    .send(OutboundFrame::Error("answer generation task failed".into()));
                dispatcher.cancel_all();
                buffer.release();
                return Next::Drain;
            }
        }

        if let Some(sentence) = segmenter.finish() {
            debug!(sequence = sentence.sequence, "remainder closed as final sentence");
            self.diagnostics
                .sentences_closed
                .fetch_add(1, Ordering::Relaxed);
            dispatcher.dispatch(sentence);
        }
        dispatcher.close();
        self.set_state(SessionState::Synthesizing);

        // Synthesizing: wait for every task, still interruptible.
        loop {
            tokio::select! {
                () = dispatcher.wait_all_terminal() => break,
                frame = inbound.recv() => match frame {
                    None => {
                        info!("client disconnected during synthesis");
                        dispatcher.cancel_all();
                        buffer.release();
                        return Next::Disconnected;
                    }
                    Some(InboundFrame::Text(text))
                        if matches!(Command::parse(&text), Some(Command::StopDiscard)) =>
                    {
                        info!("barge-in during synthesis, canceling turn");
                        dispatcher.cancel_all();
                        buffer.release();
                        return Next::Drain;
                    }
                    Some(frame) => debug!(?frame, "inbound frame ignored during synthesis"),
                },
            }
        }

        self.diagnostics
            .synthesis_failures
            .fetch_add(dispatcher.failed(), Ordering::Relaxed);
        debug_assert!(buffer.is_drained(), "all tasks terminal but chunks held");
        if self.frames.send(OutboundFrame::ChunkComplete).is_err() {
            return Next::Disconnected;
        }
        Next::Drain
    }

    fn set_state(&mut self, next: SessionState) {
        debug!(from = self.state.name(), to = next.name(), "state transition");
        self.state = next;
    }
}

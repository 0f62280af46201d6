//! Transcript aggregation: the callback-to-async bridge.
//!
//! Recognition engines deliver events from their own execution context (often
//! a foreign thread). [`TranscriptSink::push`] is the only thing that context
//! touches: it enqueues into a bounded channel and returns. A single
//! [`TranscriptDrain`] consumer on the tokio side pulls events in arrival
//! order, forwards status frames, and accumulates the composed utterance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engines::TranscriptEvent;
use crate::protocol::{FrameSink, OutboundFrame};

/// Default capacity of the transcript event queue.
pub const DEFAULT_TRANSCRIPT_QUEUE_CAPACITY: usize = 256;

/// Thread-safe event handoff handed to the recognition engine.
///
/// Cloneable; every clone feeds the same queue. Safe to call from any thread.
#[derive(Clone)]
pub struct TranscriptSink {
    tx: mpsc::Sender<TranscriptEvent>,
    dropped: Arc<AtomicUsize>,
}

impl TranscriptSink {
    /// Enqueue one event without blocking.
    ///
    /// A full queue drops the event and counts the drop; a closed queue
    /// (drain finished) discards it silently. Either way the caller's thread
    /// is never blocked or panicked.
    pub fn push(&self, event: TranscriptEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    dropped_total = total,
                    ?event,
                    "transcript queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Events dropped so far because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// What a finished recognition pass produced.
#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    /// `Final` segment texts in arrival order.
    pub finals: Vec<String>,
    /// Set when the engine ended with `Canceled` rather than a clean stop.
    pub canceled: Option<String>,
    /// Events forwarded as status frames.
    pub events_forwarded: usize,
    composed: OnceLock<String>,
}

impl AggregationOutcome {
    pub fn new(finals: Vec<String>, canceled: Option<String>, events_forwarded: usize) -> Self {
        Self {
            finals,
            canceled,
            events_forwarded,
            composed: OnceLock::new(),
        }
    }

    /// The final segments joined into the composed utterance. Empty segments
    /// are skipped; the result may trim to empty when nothing was recognized.
    /// Computed on first call, cached for the rest of the turn.
    pub fn composed_utterance(&self) -> &str {
        self.composed.get_or_init(|| {
            self.finals
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
    }
}

/// The async consumer half of the transcript queue.
pub struct TranscriptDrain {
    rx: mpsc::Receiver<TranscriptEvent>,
}

/// Create the sink/drain pair for one listening phase.
pub fn transcript_channel(capacity: usize) -> (TranscriptSink, TranscriptDrain) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        TranscriptSink {
            tx,
            dropped: Arc::new(AtomicUsize::new(0)),
        },
        TranscriptDrain { rx },
    )
}

impl TranscriptDrain {
    /// Consume events until a terminal one arrives (or all sinks drop).
    ///
    /// `Partial`/`Final` events are forwarded through `frames` in exact
    /// arrival order; `Final` texts accumulate into the outcome. Frame-send
    /// failures mean the transport is gone; draining continues so the
    /// composed utterance is still available to teardown.
    pub async fn drain(mut self, frames: &FrameSink) -> AggregationOutcome {
        let mut outcome = AggregationOutcome::new(Vec::new(), None, 0);

        while let Some(event) = self.rx.recv().await {
            match event {
                TranscriptEvent::Partial { text } => {
                    outcome.events_forwarded += 1;
                    if frames.send(OutboundFrame::Partial(text)).is_err() {
                        debug!("transport gone while forwarding partial transcript");
                    }
                }
                TranscriptEvent::Final { text } => {
                    outcome.events_forwarded += 1;
                    if frames.send(OutboundFrame::Final(text.clone())).is_err() {
                        debug!("transport gone while forwarding final transcript");
                    }
                    outcome.finals.push(text);
                }
                TranscriptEvent::SessionStopped => {
                    debug!(
                        finals = outcome.finals.len(),
                        "recognition stopped cleanly"
                    );
                    break;
                }
                TranscriptEvent::Canceled { reason } => {
                    warn!(%reason, "recognition canceled, transcript is best-effort");
                    outcome.canceled = Some(reason);
                    break;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Duration;

    fn partial(text: &str) -> TranscriptEvent {
        TranscriptEvent::Partial { text: text.into() }
    }

    fn final_(text: &str) -> TranscriptEvent {
        TranscriptEvent::Final { text: text.into() }
    }

    #[tokio::test]
    async fn forwards_frames_in_arrival_order() {
        let (sink, drain) = transcript_channel(16);
        let (frames, mut frame_rx) = FrameSink::channel();

        sink.push(partial("he"));
        sink.push(partial("hello"));
        sink.push(final_("hello world"));
        sink.push(partial("how"));
        sink.push(final_("how are you"));
        sink.push(TranscriptEvent::SessionStopped);

        let outcome = drain.drain(&frames).await;

        let mut seen = Vec::new();
        while let Ok(frame) = frame_rx.try_recv() {
            seen.push(frame);
        }
        assert_eq!(
            seen,
            vec![
                OutboundFrame::Partial("he".into()),
                OutboundFrame::Partial("hello".into()),
                OutboundFrame::Final("hello world".into()),
                OutboundFrame::Partial("how".into()),
                OutboundFrame::Final("how are you".into()),
            ]
        );
        assert_eq!(outcome.finals, vec!["hello world", "how are you"]);
        assert_eq!(outcome.composed_utterance(), "hello world how are you");
        assert!(outcome.canceled.is_none());
        assert_eq!(outcome.events_forwarded, 5);
    }

    #[tokio::test]
    async fn fifo_holds_for_events_pushed_from_a_foreign_thread() {
        let (sink, drain) = transcript_channel(256);
        let (frames, mut frame_rx) = FrameSink::channel();

        let producer = thread::spawn(move || {
            for i in 0..100 {
                sink.push(final_(&format!("seg-{i}")));
                if i % 7 == 0 {
                    thread::sleep(Duration::from_micros(200));
                }
            }
            sink.push(TranscriptEvent::SessionStopped);
        });

        let outcome = drain.drain(&frames).await;
        producer.join().expect("producer thread panicked");

        let expected: Vec<String> = (0..100).map(|i| format!("seg-{i}")).collect();
        assert_eq!(outcome.finals, expected);

        let mut frame_texts = Vec::new();
        while let Ok(frame) = frame_rx.try_recv() {
            if let OutboundFrame::Final(text) = frame {
                frame_texts.push(text);
            }
        }
        assert_eq!(frame_texts, expected);
    }

    #[test]
    fn composed_utterance_is_computed_once_and_cached() {
        let outcome = AggregationOutcome::new(vec![" hello ".into(), "".into(), "world.".into()], None, 3);
        let first = outcome.composed_utterance();
        assert_eq!(first, "hello world.");
        // Same allocation on every call.
        assert!(std::ptr::eq(first, outcome.composed_utterance()));
    }

    #[tokio::test]
    async fn canceled_still_returns_composed_text() {
        let (sink, drain) = transcript_channel(16);
        let (frames, _frame_rx) = FrameSink::channel();

        sink.push(final_("partial result"));
        sink.push(TranscriptEvent::Canceled {
            reason: "network".into(),
        });
        sink.push(final_("after cancel, never seen"));

        let outcome = drain.drain(&frames).await;
        assert_eq!(outcome.finals, vec!["partial result"]);
        assert_eq!(outcome.canceled.as_deref(), Some("network"));
    }

    #[tokio::test]
    async fn drain_ends_when_all_sinks_drop() {
        let (sink, drain) = transcript_channel(16);
        let (frames, _frame_rx) = FrameSink::channel();

        sink.push(final_("only"));
        drop(sink);

        let outcome = drain.drain(&frames).await;
        assert_eq!(outcome.finals, vec!["only"]);
        assert!(outcome.canceled.is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts_without_blocking() {
        let (sink, _drain) = transcript_channel(2);

        sink.push(partial("a"));
        sink.push(partial("b"));
        sink.push(partial("c"));
        sink.push(partial("d"));

        assert_eq!(sink.dropped(), 2);
    }

    #[tokio::test]
    async fn drain_survives_a_closed_transport() {
        let (sink, drain) = transcript_channel(16);
        let (frames, frame_rx) = FrameSink::channel();
        drop(frame_rx);

        sink.push(partial("a"));
        sink.push(final_("hello"));
        sink.push(TranscriptEvent::SessionStopped);

        let outcome = drain.drain(&frames).await;
        assert_eq!(outcome.finals, vec!["hello"]);
    }
}

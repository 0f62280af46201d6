//! Watermark ordering buffer: out-of-order synthesis completion in,
//! in-order audio frames out.
//!
//! Synthesis tasks finish in whatever order their latencies allow. Each one
//! submits its chunk group keyed by sentence sequence number; the buffer
//! flushes a contiguous run starting at the watermark (`next_expected`) and
//! holds everything else. A failed sentence submits an empty contribution so
//! the watermark still advances.
//!
//! Submissions flush under one `parking_lot::Mutex`, so outbound frame order
//! equals flush order regardless of which task's submission triggered it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ColloquyError;
use crate::protocol::{FrameSink, OutboundFrame};

/// Terminal result of one synthesis task, submitted in sequence position.
#[derive(Debug)]
pub enum SequenceOutcome {
    /// Ordered chunk group for the sentence.
    Chunks(Vec<Vec<u8>>),
    /// Synthesis failed; the sentence contributes no audio.
    Failed(String),
}

struct OrderingState {
    next_expected: u64,
    pending: HashMap<u64, SequenceOutcome>,
    released: bool,
}

/// In-order flush of concurrently-completing per-sentence audio.
pub struct OrderingBuffer {
    state: Mutex<OrderingState>,
    frames: FrameSink,
}

impl OrderingBuffer {
    pub fn new(frames: FrameSink) -> Self {
        Self {
            state: Mutex::new(OrderingState {
                next_expected: 0,
                pending: HashMap::new(),
                released: false,
            }),
            frames,
        }
    }

    /// Store one sequence's outcome and flush any now-contiguous run.
    ///
    /// Returns the number of audio frames written. Submissions after
    /// [`release`](Self::release) are dropped (late arrivals from canceled
    /// tasks must not reach a closing transport).
    pub fn submit(&self, sequence: u64, outcome: SequenceOutcome) -> usize {
        let mut state = self.state.lock();
        if state.released {
            debug!(sequence, "ordering buffer released, dropping late submission");
            return 0;
        }
        if sequence < state.next_expected || state.pending.contains_key(&sequence) {
            warn!(
                sequence,
                next_expected = state.next_expected,
                "duplicate sequence submission ignored"
            );
            return 0;
        }

        state.pending.insert(sequence, outcome);

        let mut written = 0;
        loop {
            let sequence = state.next_expected;
            let Some(ready) = state.pending.remove(&sequence) else {
                break;
            };
            match ready {
                SequenceOutcome::Chunks(chunks) => {
                    for chunk in chunks {
                        if self.frames.send(OutboundFrame::Audio(chunk)).is_err() {
                            debug!(sequence, "transport gone during audio flush");
                            state.released = true;
                            state.pending.clear();
                            return written;
                        }
                        written += 1;
                    }
                    debug!(sequence, "flushed sentence audio");
                }
                SequenceOutcome::Failed(message) => {
                    warn!(sequence, %message, "skipping failed sentence in flush order");
                    let err = ColloquyError::Synthesis { sequence, message };
                    let _ = self.frames.send(OutboundFrame::Error(err.to_string()));
                }
            }
            state.next_expected += 1;
        }
        written
    }

    /// Watermark: the lowest sequence not yet flushed.
    pub fn next_expected(&self) -> u64 {
        self.state.lock().next_expected
    }

    /// True when nothing is held back.
    pub fn is_drained(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Drop held chunks and refuse further submissions. Used on barge-in,
    /// answer failure, and disconnect.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if !state.pending.is_empty() {
            debug!(
                held = state.pending.len(),
                "releasing ordering buffer with undelivered sequences"
            );
        }
        state.released = true;
        state.pending.clear();
    }
}

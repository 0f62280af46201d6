//! Fan-out synthesis task manager.
//!
//! One tokio task per closed sentence, all running concurrently; each task
//! submits its terminal outcome to the ordering buffer and removes itself
//! from the live registry. "All synthesis done" is a two-part condition:
//! the segmenter has closed the dispatcher (no more sentences) AND the
//! registry is empty. The first-finishing task is never mistaken for the
//! last one.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engines::SynthesisEngine;
use crate::session::ordering::{OrderingBuffer, SequenceOutcome};
use crate::session::segmenter::Sentence;

struct Registry {
    live: Mutex<HashMap<u64, JoinHandle<()>>>,
    closed: AtomicBool,
    spawned: AtomicUsize,
    failed: AtomicUsize,
    notify: Notify,
}

impl Registry {
    fn settle(&self, sequence: u64) {
        self.live.lock().remove(&sequence);
        self.notify.notify_waiters();
    }
}

/// Spawns and tracks one synthesis task per sentence.
pub struct SynthesisDispatcher {
    engine: Arc<dyn SynthesisEngine>,
    buffer: Arc<OrderingBuffer>,
    registry: Arc<Registry>,
}

impl SynthesisDispatcher {
    pub fn new(engine: Arc<dyn SynthesisEngine>, buffer: Arc<OrderingBuffer>) -> Self {
        Self {
            engine,
            buffer,
            registry: Arc::new(Registry {
                live: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                spawned: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Spawn one synthesis task for a closed sentence.
    ///
    /// Never blocks on synthesis latency; later deltas keep segmenting while
    /// earlier sentences are still rendering.
    pub fn dispatch(&self, sentence: Sentence) {
        if self.registry.closed.load(Ordering::SeqCst) {
            warn!(
                sequence = sentence.sequence,
                "dispatch after close ignored"
            );
            return;
        }

        let sequence = sentence.sequence;
        let engine = Arc::clone(&self.engine);
        let buffer = Arc::clone(&self.buffer);
        let registry = Arc::clone(&self.registry);
        registry.spawned.fetch_add(1, Ordering::Relaxed);

        // Holding the registry lock across spawn+insert keeps a fast task
        // from trying to settle before its handle is registered.
        let mut live = self.registry.live.lock();
        let handle = tokio::spawn(async move {
            debug!(sequence, text_len = sentence.text.len(), "synthesis started");
            // A panicking engine must still settle, or wait_all_terminal
            // would block on this sequence forever.
            let result = AssertUnwindSafe(engine.synthesize(&sentence.text))
                .catch_unwind()
                .await;
            let outcome = match result {
                Ok(Ok(chunks)) => {
                    debug!(sequence, chunks = chunks.len(), "synthesis finished");
                    SequenceOutcome::Chunks(chunks)
                }
                Ok(Err(err)) => {
                    warn!(sequence, error = %err, "synthesis failed");
                    registry.failed.fetch_add(1, Ordering::Relaxed);
                    SequenceOutcome::Failed(err.to_string())
                }
                Err(_) => {
                    warn!(sequence, "synthesis task panicked");
                    registry.failed.fetch_add(1, Ordering::Relaxed);
                    SequenceOutcome::Failed("synthesis task panicked".into())
                }
            };
            buffer.submit(sequence, outcome);
            registry.settle(sequence);
        });
        live.insert(sequence, handle);
    }

    /// No more sentences will be dispatched.
    pub fn close(&self) {
        self.registry.closed.store(true, Ordering::SeqCst);
        self.registry.notify.notify_waiters();
    }

    /// Resolve once the dispatcher is closed AND every spawned task reached
    /// a terminal state. Never resolves early on the first-finishing task.
    pub async fn wait_all_terminal(&self) {
        loop {
            let notified = self.registry.notify.notified();
            if self.registry.closed.load(Ordering::SeqCst)
                && self.registry.live.lock().is_empty()
            {
                return;
            }
            notified.await;
        }
    }

    /// Abort every live task and close the dispatcher. Used for barge-in,
    /// answer failure, and disconnect.
    pub fn cancel_all(&self) {
        self.registry.closed.store(true, Ordering::SeqCst);
        let handles: Vec<_> = {
            let mut live = self.registry.live.lock();
            live.drain().collect()
        };
        if !handles.is_empty() {
            debug!(canceled = handles.len(), "aborting live synthesis tasks");
        }
        for (_, handle) in handles {
            handle.abort();
        }
        self.registry.notify.notify_waiters();
    }

    /// Tasks spawned this turn.
    pub fn spawned(&self) -> usize {
        self.registry.spawned.load(Ordering::Relaxed)
    }

    /// Tasks that ended in a synthesis failure.
    pub fn failed(&self) -> usize {
        self.registry.failed.load(Ordering::Relaxed)
    }
}

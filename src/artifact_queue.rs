//! Background artifact writing
//!
//! Decouples the thread that completes a trace from artifact I/O. The
//! completing thread only enqueues the finished tree; a sidecar thread drains
//! the queue in batches and hands each tree to the inner sink.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ TRACED THREAD                                │
//! │   root exit → queue.submit(tree)             │
//! │   (lock-free enqueue, never blocks)          │
//! └──────────────────────────────────────────────┘
//!                      │ ArrayQueue
//!                      ▼
//! ┌──────────────────────────────────────────────┐
//! │ SIDECAR THREAD                               │
//! │   loop { drain(BATCH_SIZE) → inner.submit }  │
//! │   sleep when idle, drain fully on shutdown   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A full queue drops the tree and reports [`ArtifactError::QueueFull`];
//! tracing never applies backpressure to the traced program.

use crate::artifacts::{ArtifactError, ArtifactSink};
use crate::config::TracerConfig;
use crate::trace_tree::TraceTree;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const BATCH_SIZE: usize = 32;
const IDLE_SLEEP_MS: u64 = 5;

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

pub struct ArtifactQueue {
    queue: Arc<ArrayQueue<TraceTree>>,
    sidecar: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl ArtifactQueue {
    /// Start the sidecar thread. A zero capacity is raised to one.
    pub fn new(capacity: usize, inner: Arc<dyn ArtifactSink>) -> std::io::Result<Self> {
        let queue = Arc::new(ArrayQueue::new(capacity.max(1)));
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let worker = Sidecar {
            queue: Arc::clone(&queue),
            shutdown: Arc::clone(&shutdown),
            counters: Arc::clone(&counters),
            inner,
        };
        let handle = thread::Builder::new()
            .name("rastreo-artifacts".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            queue,
            sidecar: Mutex::new(Some(handle)),
            shutdown,
            counters,
        })
    }

    /// Queue sized by `queue_capacity`
    pub fn from_config(config: &TracerConfig, inner: Arc<dyn ArtifactSink>) -> std::io::Result<Self> {
        Self::new(config.queue_capacity, inner)
    }

    /// Stop accepting trees, write everything still queued, join the sidecar
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handle = match self.sidecar.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("artifact sidecar thread panicked");
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            pending: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }
}

impl ArtifactSink for ArtifactQueue {
    fn submit(&self, tree: TraceTree) -> Result<(), ArtifactError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(ArtifactError::QueueClosed);
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.queue.push(tree).map_err(|tree| {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            ArtifactError::QueueFull(tree.trace_id)
        })
    }
}

impl Drop for ArtifactQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ArtifactQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactQueue")
            .field("stats", &self.stats())
            .finish()
    }
}

struct Sidecar {
    queue: Arc<ArrayQueue<TraceTree>>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
    inner: Arc<dyn ArtifactSink>,
}

impl Sidecar {
    fn run(self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                let mut remaining = 0;
                while let Some(tree) = self.queue.pop() {
                    self.write(tree);
                    remaining += 1;
                }
                debug!(remaining, "artifact sidecar drained on shutdown");
                break;
            }

            let mut drained = 0;
            while drained < BATCH_SIZE {
                let Some(tree) = self.queue.pop() else {
                    break;
                };
                self.write(tree);
                drained += 1;
            }
            if drained == 0 {
                thread::sleep(Duration::from_millis(IDLE_SLEEP_MS));
            }
        }
    }

    fn write(&self, tree: TraceTree) {
        let trace_id = tree.trace_id;
        match self.inner.submit(tree) {
            Ok(()) => {
                self.counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(%trace_id, error = %e, "failed to write trace artifacts");
            }
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub dropped: u64,
    pub written: u64,
    pub failed: u64,
    pub pending: usize,
    pub capacity: usize,
}

impl QueueStats {
    /// Fraction of submitted trees dropped by backpressure (0.0 to 1.0)
    pub fn drop_rate(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            self.dropped as f64 / self.submitted as f64
        }
    }
}

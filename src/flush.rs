//! Shutdown flush
//!
//! Traces whose root never returned (the process is exiting while threads are
//! still inside traced code) are drained from the live registry and written
//! best-effort. Each drained tree is marked partial and closed at drain time.
//! One trace failing to write never stops the others.

use crate::artifacts::ArtifactSink;
use crate::recorder::{CallRecorder, RecorderError};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub failed: usize,
}

impl FlushReport {
    pub fn written(&self) -> usize {
        self.attempted - self.failed
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flushed {} open trace(s), {} failed",
            self.attempted, self.failed
        )
    }
}

/// Drain every open trace and hand it to `sink`
pub fn flush_all(recorder: &CallRecorder, sink: &dyn ArtifactSink) -> Result<FlushReport, RecorderError> {
    let trees = recorder.drain_live()?;
    let mut report = FlushReport {
        attempted: trees.len(),
        failed: 0,
    };
    for tree in trees {
        let trace_id = tree.trace_id;
        if let Err(e) = sink.submit(tree) {
            report.failed += 1;
            warn!(%trace_id, error = %e, "failed to flush open trace");
        }
    }
    if report.attempted > 0 {
        info!(attempted = report.attempted, failed = report.failed, "shutdown flush complete");
    }
    Ok(report)
}

/// Flushes the recorder into its own sink when dropped
///
/// Hold one for the lifetime of the traced program in place of a process
/// shutdown hook.
#[derive(Debug)]
pub struct FlushGuard {
    recorder: CallRecorder,
}

impl FlushGuard {
    pub fn new(recorder: CallRecorder) -> Self {
        Self { recorder }
    }

    pub fn recorder(&self) -> &CallRecorder {
        &self.recorder
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let sink = self.recorder.sink();
        if let Err(e) = flush_all(&self.recorder, sink.as_ref()) {
            warn!(error = %e, "shutdown flush failed");
        }
    }
}

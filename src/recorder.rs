//! Concurrent call-tree recorder
//!
//! Instrumented code reports every entry and exit here. The recorder is split
//! in two:
//!
//! - [`CallRecorder`] is the shared service handle. It owns the call-id
//!   counter, the live trace registry, the clock and the artifact sink, and is
//!   cheap to clone across threads.
//! - [`ThreadRecorder`] is one thread's view. It owns that thread's stack of
//!   open frames and is deliberately `!Send`, so a stack can never be touched
//!   from another thread.
//!
//! ```text
//!  thread 1 ─┐ ThreadRecorder { frames, active trace }
//!  thread 2 ─┼──────────────┐
//!  thread 3 ─┘              ▼
//!                  CallRecorder (Arc)
//!                  ├── CallIdAllocator      (atomic)
//!                  ├── live: TraceId → Arc<Mutex<TraceTree>>
//!                  └── sink: ArtifactSink   (on root exit)
//! ```
//!
//! The registry lock is taken only when a root enters or exits. Nested calls
//! lock the one tree they belong to, so unrelated traces never contend.
//!
//! Entries past `max_depth` are suppressed: nothing is recorded and the
//! matching exits are absorbed by a counter, leaving the open frames intact.
//!
//! `enter`/`exit` never fail from the caller's point of view. Their `try_`
//! forms report what happened; the plain forms log errors at debug level and
//! drop them.

use crate::artifacts::ArtifactSink;
use crate::call_id::{CallId, CallIdAllocator};
use crate::clock::{Clock, SystemClock};
use crate::config::TracerConfig;
use crate::event::{CallEvent, Failure};
use crate::trace_id::TraceId;
use crate::trace_tree::TraceTree;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("live trace registry lock poisoned")]
    RegistryPoisoned,

    #[error("lock for trace {0} poisoned")]
    TracePoisoned(TraceId),

    #[error("open frame has no active trace")]
    MissingActiveTrace,

    #[error("trace {trace_id} has no event at index {index}")]
    MissingEvent { trace_id: TraceId, index: usize },
}

/// What an instrumented unit reports on entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite<'a> {
    pub type_name: &'a str,
    pub member: &'a str,
    pub signature: &'a str,
    /// -1 when unknown
    pub line: i64,
}

impl<'a> CallSite<'a> {
    pub fn new(type_name: &'a str, member: &'a str) -> Self {
        Self {
            type_name,
            member,
            signature: "",
            line: -1,
        }
    }

    pub fn signature(mut self, signature: &'a str) -> Self {
        self.signature = signature;
        self
    }

    pub fn line(mut self, line: i64) -> Self {
        self.line = line;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterOutcome {
    /// Stack was empty; a new trace was registered
    Root { trace_id: TraceId, call_id: CallId },
    Child { trace_id: TraceId, call_id: CallId },
    /// Past the depth limit; nothing recorded
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Closed { call_id: CallId },
    /// Root exited and the finished tree went to the sink
    RootClosed { trace_id: TraceId, call_id: CallId },
    /// Root exited after a forced drain already took the trace
    Drained { trace_id: TraceId },
    /// Matched a suppressed entry
    Absorbed,
    /// Stack was empty
    Unmatched,
}

type LiveTree = Arc<Mutex<TraceTree>>;

struct Shared {
    max_depth: usize,
    ids: CallIdAllocator,
    live: Mutex<HashMap<TraceId, LiveTree>>,
    sink: Arc<dyn ArtifactSink>,
    clock: Arc<dyn Clock>,
}

/// Shared recorder handle
#[derive(Clone)]
pub struct CallRecorder {
    shared: Arc<Shared>,
}

impl CallRecorder {
    pub fn new(max_depth: usize, sink: Arc<dyn ArtifactSink>) -> Self {
        Self::with_clock(max_depth, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(max_depth: usize, sink: Arc<dyn ArtifactSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_depth,
                ids: CallIdAllocator::new(),
                live: Mutex::new(HashMap::new()),
                sink,
                clock,
            }),
        }
    }

    pub fn from_config(config: &TracerConfig, sink: Arc<dyn ArtifactSink>) -> Self {
        Self::new(config.max_depth, sink)
    }

    /// A fresh per-thread view; create one on each thread that runs traced code
    pub fn thread(&self) -> ThreadRecorder {
        ThreadRecorder {
            shared: Arc::clone(&self.shared),
            frames: Vec::new(),
            active: None,
            suppressed: 0,
            _not_send: PhantomData,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.shared.max_depth
    }

    pub fn sink(&self) -> Arc<dyn ArtifactSink> {
        Arc::clone(&self.shared.sink)
    }

    pub fn now_us(&self) -> u64 {
        self.shared.clock.now_us()
    }

    pub fn calls_issued(&self) -> u64 {
        self.shared.ids.issued()
    }

    /// Number of traces with at least one open call
    pub fn live_count(&self) -> Result<usize, RecorderError> {
        Ok(self.registry()?.len())
    }

    pub fn live_trace_ids(&self) -> Result<Vec<TraceId>, RecorderError> {
        Ok(self.registry()?.keys().copied().collect())
    }

    /// Empty the registry, returning a partial snapshot of every open trace
    ///
    /// Threads still inside a drained trace keep recording into their own
    /// handle; when that root exits, the tree is discarded instead of being
    /// submitted a second time.
    pub fn drain_live(&self) -> Result<Vec<TraceTree>, RecorderError> {
        let taken = std::mem::take(&mut *self.registry()?);
        let now = self.now_us();
        let mut snapshots = Vec::with_capacity(taken.len());
        for (trace_id, tree) in taken {
            match tree.lock() {
                Ok(tree) => {
                    let mut snapshot = tree.clone();
                    snapshot.force_finish(now);
                    snapshots.push(snapshot);
                }
                Err(_) => warn!(%trace_id, "skipping poisoned trace during drain"),
            }
        }
        Ok(snapshots)
    }

    fn registry(&self) -> Result<std::sync::MutexGuard<'_, HashMap<TraceId, LiveTree>>, RecorderError> {
        self.shared
            .live
            .lock()
            .map_err(|_| RecorderError::RegistryPoisoned)
    }
}

impl std::fmt::Debug for CallRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRecorder")
            .field("max_depth", &self.shared.max_depth)
            .field("calls_issued", &self.shared.ids.issued())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenFrame {
    call_id: CallId,
    depth: u32,
    /// Position in the trace's event list; `None` if appending failed
    index: Option<usize>,
}

struct ActiveTrace {
    id: TraceId,
    tree: LiveTree,
}

/// One thread's open call stack
pub struct ThreadRecorder {
    shared: Arc<Shared>,
    frames: Vec<OpenFrame>,
    active: Option<ActiveTrace>,
    suppressed: usize,
    _not_send: PhantomData<*const ()>,
}

impl ThreadRecorder {
    pub fn enter(&mut self, site: &CallSite<'_>) {
        if let Err(e) = self.try_enter(site) {
            debug!(error = %e, type_name = site.type_name, member = site.member, "recorder enter failed");
        }
    }

    pub fn exit(&mut self, failure: Option<Failure>) {
        if let Err(e) = self.try_exit(failure) {
            debug!(error = %e, "recorder exit failed");
        }
    }

    pub fn try_enter(&mut self, site: &CallSite<'_>) -> Result<EnterOutcome, RecorderError> {
        if self.frames.len() >= self.shared.max_depth {
            self.suppressed += 1;
            return Ok(EnterOutcome::Suppressed);
        }

        let call_id = self.shared.ids.next();
        let now = self.shared.clock.now_us();

        let Some(parent) = self.frames.last().copied() else {
            return self.enter_root(site, call_id, now);
        };

        let depth = parent.depth + 1;
        let appended = self.append(CallEvent {
            call_id,
            trace_id: self.active.as_ref().map_or(TraceId(0), |a| a.id),
            parent_id: Some(parent.call_id),
            type_name: site.type_name.to_string(),
            member: site.member.to_string(),
            signature: site.signature.to_string(),
            line: site.line,
            depth,
            start_us: now,
            end_us: None,
            failure: None,
        });

        // The frame is pushed either way so the matching exit stays balanced
        let (index, result) = match appended {
            Ok((trace_id, index)) => (Some(index), Ok(EnterOutcome::Child { trace_id, call_id })),
            Err(e) => (None, Err(e)),
        };
        self.frames.push(OpenFrame {
            call_id,
            depth,
            index,
        });
        result
    }

    fn enter_root(
        &mut self,
        site: &CallSite<'_>,
        call_id: CallId,
        now: u64,
    ) -> Result<EnterOutcome, RecorderError> {
        let trace_id = TraceId::generate();
        let mut tree = TraceTree::new(trace_id, site.type_name, site.member, now);
        let index = tree.push(CallEvent {
            call_id,
            trace_id,
            parent_id: None,
            type_name: site.type_name.to_string(),
            member: site.member.to_string(),
            signature: site.signature.to_string(),
            line: site.line,
            depth: 0,
            start_us: now,
            end_us: None,
            failure: None,
        });

        let tree = Arc::new(Mutex::new(tree));
        self.shared
            .live
            .lock()
            .map_err(|_| RecorderError::RegistryPoisoned)?
            .insert(trace_id, Arc::clone(&tree));

        self.active = Some(ActiveTrace { id: trace_id, tree });
        self.frames.push(OpenFrame {
            call_id,
            depth: 0,
            index: Some(index),
        });
        Ok(EnterOutcome::Root { trace_id, call_id })
    }

    fn append(&self, event: CallEvent) -> Result<(TraceId, usize), RecorderError> {
        let active = self
            .active
            .as_ref()
            .ok_or(RecorderError::MissingActiveTrace)?;
        let mut tree = active
            .tree
            .lock()
            .map_err(|_| RecorderError::TracePoisoned(active.id))?;
        Ok((active.id, tree.push(event)))
    }

    pub fn try_exit(&mut self, failure: Option<Failure>) -> Result<ExitOutcome, RecorderError> {
        if self.suppressed > 0 {
            self.suppressed -= 1;
            return Ok(ExitOutcome::Absorbed);
        }
        let Some(frame) = self.frames.pop() else {
            return Ok(ExitOutcome::Unmatched);
        };

        let now = self.shared.clock.now_us();
        let stamped = self.stamp(&frame, now, failure);
        if !self.frames.is_empty() {
            stamped?;
            return Ok(ExitOutcome::Closed {
                call_id: frame.call_id,
            });
        }

        let active = self
            .active
            .take()
            .ok_or(RecorderError::MissingActiveTrace)?;
        let removed = self
            .shared
            .live
            .lock()
            .map_err(|_| RecorderError::RegistryPoisoned)?
            .remove(&active.id);
        if removed.is_none() {
            debug!(trace_id = %active.id, "root exited after drain");
            return Ok(ExitOutcome::Drained { trace_id: active.id });
        }
        drop(removed);
        stamped?;

        let mut tree = match Arc::try_unwrap(active.tree) {
            Ok(tree) => tree
                .into_inner()
                .map_err(|_| RecorderError::TracePoisoned(active.id))?,
            Err(tree) => tree
                .lock()
                .map_err(|_| RecorderError::TracePoisoned(active.id))?
                .clone(),
        };
        tree.finish(now);

        if let Err(e) = self.shared.sink.submit(tree) {
            warn!(trace_id = %active.id, error = %e, "failed to hand off trace artifacts");
        }
        Ok(ExitOutcome::RootClosed {
            trace_id: active.id,
            call_id: frame.call_id,
        })
    }

    fn stamp(&self, frame: &OpenFrame, now: u64, failure: Option<Failure>) -> Result<(), RecorderError> {
        let Some(index) = frame.index else {
            return Ok(());
        };
        let active = self
            .active
            .as_ref()
            .ok_or(RecorderError::MissingActiveTrace)?;
        let mut tree = active
            .tree
            .lock()
            .map_err(|_| RecorderError::TracePoisoned(active.id))?;
        let event = tree.event_mut(index).ok_or(RecorderError::MissingEvent {
            trace_id: active.id,
            index,
        })?;
        event.finish(now, failure);
        Ok(())
    }

    /// Number of recorded frames currently open
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_idle(&self) -> bool {
        self.frames.is_empty() && self.suppressed == 0
    }

    pub fn current_trace(&self) -> Option<TraceId> {
        self.active.as_ref().map(|a| a.id)
    }

    pub fn recorder(&self) -> CallRecorder {
        CallRecorder {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for ThreadRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRecorder")
            .field("frames", &self.frames)
            .field("trace", &self.current_trace())
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

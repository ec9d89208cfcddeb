//! Recorded invocations

use crate::call_id::CallId;
use crate::trace_id::TraceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A failure that escaped an instrumented unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Namespace-qualified failure type, e.g. `shop.StockError`
    pub kind: String,
    pub message: String,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Last segment of the kind (`StockError`)
    pub fn simple_kind(&self) -> &str {
        simple_name(&self.kind)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Last `.`-separated segment of a qualified name
pub fn simple_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub call_id: CallId,
    pub trace_id: TraceId,
    /// Immediate caller; `None` for the root
    pub parent_id: Option<CallId>,
    pub type_name: String,
    pub member: String,
    pub signature: String,
    /// Best-effort source line, -1 when unknown
    pub line: i64,
    /// 0 at the root, parent depth + 1 otherwise
    pub depth: u32,
    pub start_us: u64,
    /// `None` while the call is still open
    pub end_us: Option<u64>,
    pub failure: Option<Failure>,
}

impl CallEvent {
    /// Wall-clock duration, known once the call has exited
    pub fn duration_us(&self) -> Option<u64> {
        self.end_us.map(|end| end.saturating_sub(self.start_us))
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn finish(&mut self, end_us: u64, failure: Option<Failure>) {
        self.end_us = Some(end_us);
        self.failure = failure;
    }
}

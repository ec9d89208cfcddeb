//! Structured trace record (`trace.json`)
//!
//! One self-describing JSON document per trace: identity, root, timing,
//! the ordered call list and the involved types.

use crate::call_id::CallId;
use crate::event::{CallEvent, Failure};
use crate::trace_id::TraceId;
use crate::trace_tree::TraceTree;
use fnv::FnvHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RECORD_FORMAT: &str = "rastreo-trace-v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("call {0} appears more than once")]
    DuplicateCall(CallId),

    #[error("call {call_id} names parent {parent_id}, which is not an earlier call")]
    ParentNotEarlier { call_id: CallId, parent_id: CallId },
}

/// A single exported call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: CallId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<CallId>,
    pub type_name: String,
    pub member: String,
    #[serde(default)]
    pub signature: String,
    pub depth: u32,
    pub line: i64,
    pub start_time_us: u64,
    /// Absent while the call was still open (drained traces)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_us: Option<u64>,
    pub has_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_message: Option<String>,
}

impl From<&CallEvent> for CallRecord {
    fn from(event: &CallEvent) -> Self {
        Self {
            call_id: event.call_id,
            parent_id: event.parent_id,
            type_name: event.type_name.clone(),
            member: event.member.clone(),
            signature: event.signature.clone(),
            depth: event.depth,
            line: event.line,
            start_time_us: event.start_us,
            duration_us: event.duration_us(),
            has_failure: event.failure.is_some(),
            failure_kind: event.failure.as_ref().map(|f| f.kind.clone()),
            failure_message: event.failure.as_ref().map(|f| f.message.clone()),
        }
    }
}

/// Root record structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    /// Format name
    pub format: String,
    /// Tool version that wrote the record
    pub version: String,
    pub trace_id: TraceId,
    pub root_type: String,
    pub root_member: String,
    pub start_time_us: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time_us: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_duration_us: Option<u64>,
    pub call_count: usize,
    /// Drained before the root returned
    #[serde(default)]
    pub partial: bool,
    pub calls: Vec<CallRecord>,
    pub involved_types: Vec<String>,
}

impl TraceRecord {
    pub fn from_tree(tree: &TraceTree) -> Self {
        Self {
            format: RECORD_FORMAT.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            trace_id: tree.trace_id,
            root_type: tree.root_type.clone(),
            root_member: tree.root_member.clone(),
            start_time_us: tree.start_us,
            end_time_us: tree.end_us,
            total_duration_us: tree.duration_us(),
            call_count: tree.call_count(),
            partial: tree.partial,
            calls: tree.events().iter().map(CallRecord::from).collect(),
            involved_types: tree.involved_types().to_vec(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Rebuild the tree so artifacts can be regenerated from a stored record
    ///
    /// Every `parentId` must name a call listed before it.
    pub fn into_tree(self) -> Result<TraceTree, RecordError> {
        let mut seen = FnvHashSet::default();
        for call in &self.calls {
            if let Some(parent_id) = call.parent_id {
                if !seen.contains(&parent_id) {
                    return Err(RecordError::ParentNotEarlier {
                        call_id: call.call_id,
                        parent_id,
                    });
                }
            }
            if !seen.insert(call.call_id) {
                return Err(RecordError::DuplicateCall(call.call_id));
            }
        }

        let mut tree = TraceTree::new(self.trace_id, self.root_type, self.root_member, self.start_time_us);
        tree.end_us = self.end_time_us;
        tree.partial = self.partial;

        for call in self.calls {
            let failure = call.has_failure.then(|| {
                Failure::new(
                    call.failure_kind.unwrap_or_else(|| "unknown".to_string()),
                    call.failure_message.unwrap_or_default(),
                )
            });
            tree.push(CallEvent {
                call_id: call.call_id,
                trace_id: self.trace_id,
                parent_id: call.parent_id,
                end_us: call.duration_us.map(|d| call.start_time_us.saturating_add(d)),
                type_name: call.type_name,
                member: call.member,
                signature: call.signature,
                line: call.line,
                depth: call.depth,
                start_us: call.start_time_us,
                failure,
            });
        }
        Ok(tree)
    }
}

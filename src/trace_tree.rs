//! One trace's flat, pre-order call list
//!
//! Events are appended at entry, so a parent always precedes every one of its
//! descendants and children appear in the order they were called. Exit only
//! stamps the already-appended event.

use crate::call_id::CallId;
use crate::event::CallEvent;
use crate::trace_id::TraceId;
use fnv::FnvHashSet;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceTree {
    pub trace_id: TraceId,
    pub root_type: String,
    pub root_member: String,
    pub start_us: u64,
    pub end_us: Option<u64>,
    /// Set when the tree was drained before its root exited
    pub partial: bool,
    events: Vec<CallEvent>,
    involved_types: Vec<String>,
    seen_types: HashSet<String>,
}

impl TraceTree {
    pub fn new(
        trace_id: TraceId,
        root_type: impl Into<String>,
        root_member: impl Into<String>,
        start_us: u64,
    ) -> Self {
        Self {
            trace_id,
            root_type: root_type.into(),
            root_member: root_member.into(),
            start_us,
            end_us: None,
            partial: false,
            events: Vec::new(),
            involved_types: Vec::new(),
            seen_types: HashSet::new(),
        }
    }

    /// Append an event and register its type; returns the event's index
    pub fn push(&mut self, event: CallEvent) -> usize {
        if self.seen_types.insert(event.type_name.clone()) {
            self.involved_types.push(event.type_name.clone());
        }
        self.events.push(event);
        self.events.len() - 1
    }

    pub fn event_mut(&mut self, index: usize) -> Option<&mut CallEvent> {
        self.events.get_mut(index)
    }

    /// Events in pre-order
    pub fn events(&self) -> &[CallEvent] {
        &self.events
    }

    pub fn root(&self) -> Option<&CallEvent> {
        self.events.first()
    }

    /// Distinct types in first-seen order
    pub fn involved_types(&self) -> &[String] {
        &self.involved_types
    }

    pub fn call_count(&self) -> usize {
        self.events.len()
    }

    pub fn duration_us(&self) -> Option<u64> {
        self.end_us.map(|end| end.saturating_sub(self.start_us))
    }

    pub fn is_complete(&self) -> bool {
        self.end_us.is_some() && !self.partial
    }

    pub fn finish(&mut self, end_us: u64) {
        self.end_us = Some(end_us);
    }

    /// Close a tree whose root is still running
    pub fn force_finish(&mut self, end_us: u64) {
        if self.end_us.is_none() {
            self.end_us = Some(end_us);
        }
        self.partial = true;
    }

    /// Ids that appear as some event's parent
    pub fn parent_ids(&self) -> FnvHashSet<CallId> {
        self.events.iter().filter_map(|e| e.parent_id).collect()
    }

    /// Calls with no recorded descendant
    pub fn leaves(&self) -> impl Iterator<Item = &CallEvent> {
        let parents = self.parent_ids();
        self.events
            .iter()
            .filter(move |e| !parents.contains(&e.call_id))
    }
}

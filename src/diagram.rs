//! Sequence diagram reconstruction (PlantUML text)
//!
//! Rebuilds caller/callee messages from a trace's flat pre-order event list.
//!
//! ```text
//! events (pre-order)                 diagram
//! ───────────────────────────        ───────────────────────────────────
//! #1 A.foo     parent -              Actor -> C0: foo()
//! #2 B.bar     parent #1             C0 -> C1: bar()
//! #3 C.baz     parent #2  (leaf)     C1 -> C2: baz() (5ms)
//!                                    C2 --> C1: return
//!                                    C1 --> C0: return   (closing pops)
//!                                    C0 --> Actor: return
//! ```
//!
//! Participants get aliases `C0`, `C1`, ... in first-seen order behind a
//! synthetic `Actor`. An active-participant stack tracks open callers: before
//! each message the stack unwinds to the event's nearest recorded ancestor,
//! emitting the returns of the participants it pops. Leaves return at once;
//! a failing leaf returns with an exception-styled arrow. Participants still
//! open after the last event (a drained, partial trace) are closed in stack
//! order. Events whose type has no alias (hidden prefixes) are skipped.

use crate::call_id::CallId;
use crate::event::{simple_name, CallEvent};
use crate::trace_tree::TraceTree;
use fnv::FnvHashMap;
use std::collections::HashMap;
use std::fmt::Write;

const ACTOR: &str = "Actor";

/// Renders one trace as PlantUML text
///
/// A failing call that made calls of its own stays active until its children
/// are drawn, then returns with the `--x` failure arrow.
#[derive(Debug, Clone, Default)]
pub struct DiagramRenderer {
    hidden_prefixes: Vec<String>,
}

struct Active<'a> {
    alias: &'a str,
    /// `None` for the synthetic actor
    call_id: Option<CallId>,
    failure_kind: Option<&'a str>,
}

impl DiagramRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave types with this name prefix out of the diagram
    pub fn hide_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.hidden_prefixes.push(prefix.into());
        self
    }

    fn is_hidden(&self, type_name: &str) -> bool {
        self.hidden_prefixes
            .iter()
            .any(|p| type_name.starts_with(p.as_str()))
    }

    pub fn render(&self, tree: &TraceTree) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_diagram(&mut out, tree);
        out
    }

    fn write_diagram(&self, out: &mut String, tree: &TraceTree) -> std::fmt::Result {
        writeln!(out, "@startuml")?;
        writeln!(
            out,
            "title {}.{}()",
            simple_name(&tree.root_type),
            tree.root_member
        )?;
        writeln!(out, "skinparam sequenceMessageAlign center")?;
        writeln!(out, "skinparam responseMessageBelowArrow true")?;
        writeln!(out)?;
        writeln!(out, "actor {ACTOR}")?;

        let aliases: HashMap<&str, String> = tree
            .involved_types()
            .iter()
            .filter(|t| !self.is_hidden(t))
            .enumerate()
            .map(|(i, t)| (t.as_str(), format!("C{i}")))
            .collect();
        for type_name in tree.involved_types() {
            if let Some(alias) = aliases.get(type_name.as_str()) {
                writeln!(out, "participant \"{}\" as {alias}", simple_name(type_name))?;
            }
        }
        writeln!(out)?;

        let parents = tree.parent_ids();
        let parent_of: FnvHashMap<CallId, Option<CallId>> = tree
            .events()
            .iter()
            .map(|e| (e.call_id, e.parent_id))
            .collect();

        let mut stack = vec![Active {
            alias: ACTOR,
            call_id: None,
            failure_kind: None,
        }];

        for event in tree.events() {
            let Some(target) = aliases.get(event.type_name.as_str()) else {
                continue;
            };

            let ancestors = ancestors_of(event, &parent_of);
            while stack.len() > 1 {
                let top = stack.last().and_then(|a| a.call_id);
                if top.is_some_and(|id| ancestors.contains(&id)) {
                    break;
                }
                close_top(out, &mut stack)?;
            }
            let source = stack.last().map_or(ACTOR, |a| a.alias);

            write!(out, "{source} -> {target}: {}()", event.member)?;
            if let Some(d) = event.duration_us().filter(|d| *d > 0) {
                write!(out, " ({})", format_duration_us(d))?;
            }
            writeln!(out)?;
            writeln!(out, "activate {target}")?;

            let is_leaf = !parents.contains(&event.call_id);
            match (&event.failure, is_leaf) {
                (Some(failure), true) => {
                    writeln!(
                        out,
                        "{target} --x {source}: <font color=red>{}</font>",
                        failure.simple_kind()
                    )?;
                    writeln!(out, "deactivate {target}")?;
                }
                (None, true) => {
                    writeln!(out, "{target} --> {source}: return")?;
                    writeln!(out, "deactivate {target}")?;
                }
                (failure, false) => stack.push(Active {
                    alias: target,
                    call_id: Some(event.call_id),
                    failure_kind: failure.as_ref().map(|f| f.simple_kind()),
                }),
            }
        }

        while stack.len() > 1 {
            close_top(out, &mut stack)?;
        }

        writeln!(out)?;
        writeln!(out, "note right")?;
        writeln!(out, "  TraceId: {}", tree.trace_id)?;
        writeln!(
            out,
            "  Total: {}",
            format_duration_us(tree.duration_us().unwrap_or(0))
        )?;
        writeln!(out, "  Calls: {}", tree.call_count())?;
        if tree.partial {
            writeln!(out, "  Partial: drained before the root returned")?;
        }
        writeln!(out, "end note")?;
        write!(out, "@enduml")
    }
}

/// Pop the top participant and emit its return to whatever lies beneath it
fn close_top(out: &mut String, stack: &mut Vec<Active<'_>>) -> std::fmt::Result {
    let Some(from) = stack.pop() else {
        return Ok(());
    };
    let to = stack.last().map_or(ACTOR, |a| a.alias);
    match from.failure_kind {
        Some(kind) => writeln!(out, "{} --x {to}: <font color=red>{kind}</font>", from.alias)?,
        None => writeln!(out, "{} --> {to}: return", from.alias)?,
    }
    writeln!(out, "deactivate {}", from.alias)
}

fn ancestors_of(event: &CallEvent, parent_of: &FnvHashMap<CallId, Option<CallId>>) -> Vec<CallId> {
    let mut chain = Vec::with_capacity(event.depth as usize);
    let mut next = event.parent_id;
    // A chain longer than the event count can only be a parent cycle
    while let Some(id) = next {
        if chain.len() >= parent_of.len() {
            break;
        }
        chain.push(id);
        next = parent_of.get(&id).copied().flatten();
    }
    chain
}

/// `5ms` from 1000us upwards, `250us` below
pub fn format_duration_us(us: u64) -> String {
    if us >= 1000 {
        format!("{}ms", us / 1000)
    } else {
        format!("{us}us")
    }
}

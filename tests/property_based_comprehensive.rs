//! Property-based tests over random call sequences
//!
//! Drives the recorder with arbitrary well-nested enter/exit streams (plus
//! stray exits) and checks the structural guarantees of every finished trace.

use proptest::prelude::*;
use rastreo::artifacts::{ArtifactError, ArtifactSink};
use rastreo::config::TracerConfig;
use rastreo::diagram::DiagramRenderer;
use rastreo::filter::NameFilter;
use rastreo::recorder::{CallRecorder, CallSite};
use rastreo::trace_tree::TraceTree;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const TYPES: [&str; 4] = ["shop.A", "shop.B", "billing.C", "billing.D"];

#[derive(Default)]
struct Collect(Mutex<Vec<TraceTree>>);

impl ArtifactSink for Collect {
    fn submit(&self, tree: TraceTree) -> Result<(), ArtifactError> {
        self.0.lock().unwrap().push(tree);
        Ok(())
    }
}

/// Replay `ops` (true = enter TYPES[i], false = exit), then unwind fully.
/// Returns the finished trees and how many entries should have been recorded.
fn replay(ops: &[(bool, usize)], max_depth: usize) -> (Vec<TraceTree>, usize) {
    let sink = Arc::new(Collect::default());
    let recorder = CallRecorder::new(max_depth, sink.clone());
    let mut thread = recorder.thread();
    let mut depth = 0usize;
    let mut expected = 0usize;

    for &(is_enter, type_index) in ops {
        if is_enter {
            if depth < max_depth {
                expected += 1;
            }
            thread.enter(&CallSite::new(TYPES[type_index], "m"));
            depth += 1;
        } else {
            thread.exit(None);
            depth = depth.saturating_sub(1);
        }
    }
    while depth > 0 {
        thread.exit(None);
        depth -= 1;
    }
    assert!(thread.is_idle());
    assert_eq!(recorder.live_count().unwrap(), 0);

    let trees = std::mem::take(&mut *sink.0.lock().unwrap());
    (trees, expected)
}

fn ops_strategy() -> impl Strategy<Value = Vec<(bool, usize)>> {
    prop::collection::vec((any::<bool>(), 0usize..TYPES.len()), 0..80)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_traces_are_preorder(ops in ops_strategy(), max_depth in 1usize..8) {
        let (trees, _) = replay(&ops, max_depth);

        for tree in &trees {
            let events = tree.events();
            prop_assert!(!events.is_empty());
            prop_assert!(events[0].parent_id.is_none());
            prop_assert_eq!(events[0].depth, 0);

            let mut seen: HashMap<u64, u32> = HashMap::new();
            for (i, event) in events.iter().enumerate() {
                prop_assert_eq!(event.trace_id, tree.trace_id);
                prop_assert!(event.end_us.is_some());
                prop_assert!((event.depth as usize) < max_depth);
                if i > 0 {
                    // Parent is an earlier event one level up
                    let parent = event.parent_id.expect("non-root has a parent");
                    prop_assert_eq!(seen.get(&parent.0).copied(), Some(event.depth - 1));
                    prop_assert!(events[i - 1].call_id < event.call_id);
                }
                seen.insert(event.call_id.0, event.depth);
            }
        }
    }

    #[test]
    fn prop_depth_limit_drops_exactly_the_excess(ops in ops_strategy(), max_depth in 1usize..8) {
        let (trees, expected) = replay(&ops, max_depth);
        let recorded: usize = trees.iter().map(TraceTree::call_count).sum();
        prop_assert_eq!(recorded, expected);
    }

    #[test]
    fn prop_involved_types_first_seen_distinct(ops in ops_strategy()) {
        let (trees, _) = replay(&ops, 50);
        for tree in &trees {
            let mut expected: Vec<&str> = Vec::new();
            for event in tree.events() {
                if !expected.contains(&event.type_name.as_str()) {
                    expected.push(&event.type_name);
                }
            }
            prop_assert_eq!(tree.involved_types(), expected.as_slice());
        }
    }

    #[test]
    fn prop_diagram_activations_balance(ops in ops_strategy(), hide_billing in any::<bool>()) {
        let (trees, _) = replay(&ops, 50);
        let renderer = if hide_billing {
            DiagramRenderer::new().hide_prefix("billing.")
        } else {
            DiagramRenderer::new()
        };
        for tree in &trees {
            let diagram = renderer.render(tree);
            let activations = diagram.lines().filter(|l| l.starts_with("activate ")).count();
            let deactivations = diagram.lines().filter(|l| l.starts_with("deactivate ")).count();
            prop_assert_eq!(activations, deactivations);

            let visible = tree
                .events()
                .iter()
                .filter(|e| !(hide_billing && e.type_name.starts_with("billing.")))
                .count();
            prop_assert_eq!(activations, visible);
            if !(hide_billing && tree.root_type.starts_with("billing.")) {
                // Only the root is called from outside
                prop_assert_eq!(diagram.matches("Actor -> ").count(), 1);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_exclude_always_wins(name in "[a-z]{1,8}", include in any::<bool>()) {
        let excluded = format!("secret.{name}");
        let mut filter = NameFilter::all().exclude(["secret."]);
        if include {
            filter = filter.include(["secret."]);
        }
        prop_assert!(!filter.should_trace(&excluded));
        prop_assert_eq!(filter.should_trace(&format!("open.{name}")), !include);
    }

    #[test]
    fn prop_agent_args_max_depth(depth in 1usize..10_000) {
        let config = TracerConfig::parse_agent_args(&format!("maxDepth={depth}")).unwrap();
        prop_assert_eq!(config.max_depth, depth);
    }
}

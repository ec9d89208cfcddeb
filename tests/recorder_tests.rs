// End-to-end recording through instrumented units

mod utils;

use rastreo::clock::ManualClock;
use rastreo::diagram::DiagramRenderer;
use rastreo::export::TraceRecord;
use rastreo::filter::NameFilter;
use rastreo::recorder::CallRecorder;
use rastreo::transform::Instrumenter;
use std::sync::Arc;
use utils::{
    chain_classes, checkout_classes, instrument_all, recursive_class, CollectingSink, Machine,
    Value,
};

fn setup(max_depth: usize, classes: Vec<rastreo::unit::ClassUnit>) -> (Machine, Arc<CollectingSink>, CallRecorder) {
    let sink = Arc::new(CollectingSink::default());
    let clock = Arc::new(ManualClock::new(1_000_000));
    let recorder = CallRecorder::with_clock(max_depth, sink.clone(), clock.clone());
    let instrumented = instrument_all(&Instrumenter::new(NameFilter::with_default_excludes()), &classes);
    let machine = Machine::new(instrumented)
        .with_recorder(recorder.thread())
        .with_clock(clock);
    (machine, sink, recorder)
}

#[test]
fn test_three_level_chain() {
    let (mut machine, sink, recorder) = setup(50, chain_classes());
    assert_eq!(machine.call("shop.A", "foo", vec![]), Ok(Some(Value::Int(42))));

    let trees = sink.take();
    assert_eq!(trees.len(), 1);
    let tree = &trees[0];
    assert_eq!(recorder.live_count().unwrap(), 0);

    let depths: Vec<u32> = tree.events().iter().map(|e| e.depth).collect();
    assert_eq!(depths, vec![0, 1, 2]);
    let leaves: Vec<&str> = tree.leaves().map(|e| e.member.as_str()).collect();
    assert_eq!(leaves, vec!["baz"]);
    assert_eq!(tree.events()[2].duration_us(), Some(5_000));
    assert_eq!(tree.root().unwrap().line, 10);
    assert_eq!(tree.events()[1].line, -1);
    assert_eq!(tree.root().unwrap().signature, "() -> int");

    let diagram = DiagramRenderer::new().render(tree);
    assert_eq!(diagram.matches("participant ").count(), 3);
    assert!(diagram.contains("actor Actor"));
    assert!(diagram.contains("C1 -> C2: baz() (5ms)"));
    assert!(diagram.contains("C0 --> Actor: return"));

    let record = TraceRecord::from_tree(tree);
    assert_eq!(record.call_count, 3);
    assert_eq!(record.root_type, "shop.A");
    assert_eq!(record.root_member, "foo");
    assert_eq!(record.total_duration_us, Some(5_000));
}

#[test]
fn test_root_failure_is_exported_and_drawn() {
    let (mut machine, sink, _) = setup(50, checkout_classes());
    assert!(machine.call("shop.Checkout", "checkout", vec![Value::Int(0)]).is_err());

    let tree = &sink.take()[0];
    let record = TraceRecord::from_tree(tree);
    assert!(record.calls[0].has_failure);
    assert_eq!(record.calls[0].failure_kind.as_deref(), Some("shop.StockError"));

    let diagram = DiagramRenderer::new().render(tree);
    assert!(diagram.contains("C0 --x Actor: <font color=red>StockError</font>"));
    assert!(diagram.contains("C1 --x C0: <font color=red>StockError</font>"));
}

#[test]
fn test_depth_limit_on_deep_recursion() {
    let (mut machine, sink, _) = setup(5, vec![recursive_class()]);
    assert_eq!(machine.call("shop.Rec", "down", vec![Value::Int(20)]), Ok(Some(Value::Int(0))));
    assert!(machine.recorder().is_idle());

    let tree = &sink.take()[0];
    assert_eq!(tree.call_count(), 5);
    assert!(tree.events().iter().all(|e| e.end_us.is_some()));
    let depths: Vec<u32> = tree.events().iter().map(|e| e.depth).collect();
    assert_eq!(depths, vec![0, 1, 2, 3, 4]);

    // The next root on the same thread starts cleanly
    machine.call("shop.Rec", "down", vec![Value::Int(2)]).unwrap();
    assert_eq!(sink.take()[0].call_count(), 3);
}

#[test]
fn test_each_root_call_is_its_own_trace() {
    let (mut machine, sink, _) = setup(50, checkout_classes());
    for n in 1..=4 {
        machine.call("shop.Checkout", "checkout", vec![Value::Int(n)]).unwrap();
    }
    let trees = sink.take();
    assert_eq!(trees.len(), 4);
    for window in trees.windows(2) {
        assert_ne!(window[0].trace_id, window[1].trace_id);
        assert!(window[0].root().unwrap().call_id < window[1].root().unwrap().call_id);
    }
}

#[test]
fn test_concurrent_threads_keep_traces_apart() {
    let sink = Arc::new(CollectingSink::default());
    let recorder = CallRecorder::new(50, sink.clone());
    let classes = instrument_all(&Instrumenter::new(NameFilter::all()), &checkout_classes());

    let handles: Vec<_> = (0..6)
        .map(|t| {
            let recorder = recorder.clone();
            let classes = classes.clone();
            std::thread::spawn(move || {
                let mut machine = Machine::new(classes).with_recorder(recorder.thread());
                for i in 0..30 {
                    // Every fifth call fails inside the inventory
                    let n = if i % 5 == 0 { 0 } else { t * 100 + i };
                    let _ = machine.call("shop.Checkout", "checkout", vec![Value::Int(n)]);
                }
                assert!(machine.recorder().is_idle());
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let trees = sink.take();
    assert_eq!(trees.len(), 180);
    let mut ids: Vec<u64> = Vec::new();
    for tree in &trees {
        let events = tree.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.trace_id == tree.trace_id));
        assert_eq!(events[1].parent_id, Some(events[0].call_id));
        assert_eq!(events[0].failure.is_some(), events[1].failure.is_some());
        ids.extend(events.iter().map(|e| e.call_id.0));
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 360);
    assert_eq!(recorder.live_count().unwrap(), 0);
}

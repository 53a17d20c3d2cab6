use super::*;
use identity::TypeIdentity;
use parking_lot::Mutex;
use runnable::{Lifecycle, RunState, Runnable};
use std::sync::Arc;
use std::thread;

struct Capture;
struct Tracking;
struct Telemetry;

struct Recorder {
    label: &'static str,
    lifecycle: Lifecycle,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Recorder {
    fn new(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            label,
            lifecycle: Lifecycle::new(),
            log: Arc::clone(log),
        }
    }
}

impl Runnable for Recorder {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn name(&self) -> &str {
        self.label
    }

    fn stop(&self) {
        if self.lifecycle.stop() {
            self.log.lock().push(self.label);
        }
    }
}

struct Other(Recorder);

impl Runnable for Other {
    fn lifecycle(&self) -> &Lifecycle {
        self.0.lifecycle()
    }

    fn name(&self) -> &str {
        self.0.name()
    }

    fn stop(&self) {
        self.0.stop();
    }
}

fn traverse(parent: &Context) -> Vec<Context> {
    let mut out = Vec::new();
    let mut cursor = parent.first_child();
    while let Some(child) = cursor {
        cursor = child.next_sibling();
        out.push(child);
    }
    out
}

#[test]
fn children_traverse_in_creation_order() {
    let root = Context::global();
    assert_eq!(root.name(), "Global");
    assert!(root.first_child().is_none());
    assert!(root.next_sibling().is_none());

    let capture = root.create_child::<Capture>().unwrap();
    let tracking = root.create_child::<Tracking>().unwrap();
    let telemetry = root.create_child::<Telemetry>().unwrap();

    let order: Vec<&str> = traverse(&root).iter().map(Context::name).collect();
    assert_eq!(order, ["Capture", "Tracking", "Telemetry"]);
    assert_eq!(capture.parent().unwrap(), root);
    assert_eq!(capture.next_sibling().unwrap(), tracking);
    assert!(telemetry.next_sibling().is_none());
    assert_eq!(root.child_count(), 3);
    assert!(capture.serial() < tracking.serial());
}

#[test]
fn teardown_detaches_child_and_refuses_new_children() {
    let root = Context::global();
    let capture = root.create_child::<Capture>().unwrap();
    let telemetry = root.create_child::<Telemetry>().unwrap();

    capture.teardown();
    capture.teardown();
    assert_eq!(capture.state(), ContextState::TornDown);
    assert_eq!(traverse(&root), vec![telemetry]);

    let err = capture.create_child::<Tracking>().unwrap_err();
    assert!(matches!(err, ContextError::ContextTornDown { ref context } if context == "Capture"));
}

#[test]
fn members_resolve_through_ancestors() {
    struct Calibration(u32);

    let root = Context::global();
    let capture = root.create_child::<Capture>().unwrap();
    let tracking = capture.create_child::<Tracking>().unwrap();

    root.inject(Calibration(7)).unwrap();
    assert_eq!(tracking.resolve::<Calibration>().unwrap().0, 7);
    assert!(tracking.resolve_local::<Calibration>().is_none());

    capture.inject(Calibration(9)).unwrap();
    assert_eq!(tracking.resolve::<Calibration>().unwrap().0, 9, "nearest ancestor wins");
    assert_eq!(capture.members(), vec![TypeIdentity::of::<Calibration>()]);
}

#[test]
fn duplicate_member_is_rejected() {
    let root = Context::global();
    root.inject(5u32).unwrap();
    let err = root.inject(6u32).unwrap_err();
    assert!(matches!(err, ContextError::DuplicateMember { .. }));
    assert_eq!(*root.resolve_local::<u32>().unwrap(), 5, "first member untouched");
}

#[test]
fn initiate_starts_runnables_and_late_registrations() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let root = Context::global();
    let child = root.create_child::<Capture>().unwrap();

    let early = root.add_runnable(Recorder::new("early", &log)).unwrap();
    let nested = child.add_runnable(Recorder::new("nested", &log)).unwrap();
    assert_eq!(early.state(), RunState::Waiting);

    root.initiate().unwrap();
    assert!(root.is_initiated());
    assert!(child.is_initiated());
    assert!(early.is_running());
    assert!(nested.is_running());

    let late = root.add_runnable(Other(Recorder::new("late", &log))).unwrap();
    assert!(late.is_running(), "late runnable starts on registration");

    let entries = root.runnables();
    let names: Vec<&str> = entries.iter().map(|e| e.runnable().name()).collect();
    assert_eq!(names, ["early", "late"]);
    assert_eq!(entries[0].identity(), TypeIdentity::of::<Recorder>());
}

#[test]
fn teardown_stops_children_before_parent() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let root = Context::global();
    let capture = root.create_child::<Capture>().unwrap();
    let tracking = capture.create_child::<Tracking>().unwrap();

    let outer = root.add_runnable(Recorder::new("root", &log)).unwrap();
    capture.add_runnable(Recorder::new("capture", &log)).unwrap();
    tracking.add_runnable(Recorder::new("tracking", &log)).unwrap();
    root.initiate().unwrap();

    root.teardown();
    assert_eq!(*log.lock(), ["tracking", "capture", "root"]);
    assert_eq!(outer.state(), RunState::Stopped);
    assert!(root.runnables().is_empty());
    assert!(tracking.is_torn_down());
}

#[test]
fn externally_owned_runnable_is_not_kept_alive() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let root = Context::global();
    let owned = Arc::new(Recorder::new("external", &log));
    root.register_runnable(&owned).unwrap();
    assert_eq!(root.runnables().len(), 1);
    drop(owned);
    assert!(root.runnables().is_empty());
}

#[test]
fn dropping_the_last_handle_stops_runnables() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let runnable = {
        let root = Context::global();
        let child = root.create_child::<Capture>().unwrap();
        child.add_runnable(Recorder::new("child", &log)).unwrap();
        let runnable = root.add_runnable(Recorder::new("root", &log)).unwrap();
        root.initiate().unwrap();
        drop(child);
        runnable
    };
    assert_eq!(runnable.state(), RunState::Stopped);
    assert_eq!(*log.lock(), ["child", "root"]);
}

#[test]
fn concurrent_traversal_sees_whole_lists() {
    let root = Context::global();
    let reader_root = root.clone();
    let reader = thread::spawn(move || {
        let mut last = 0;
        for _ in 0..200 {
            let snapshot = reader_root.children();
            let seen = snapshot.len();
            assert!(snapshot.iter().all(|child| child.parent().is_some()));
            assert!(seen >= last, "children only grow here");
            last = seen;
        }
    });

    for _ in 0..64 {
        root.create_child::<Capture>().unwrap();
    }
    reader.join().unwrap();
    assert_eq!(traverse(&root).len(), 64);
}

mod prop {
    use super::*;
    use proptest::collection;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    enum Op {
        Create(u8),
        TearDown(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0u8..4).prop_map(Op::Create),
            1 => any::<usize>().prop_map(Op::TearDown),
        ]
    }

    proptest! {
        /// Traversal matches a model list under any mix of creations and teardowns.
        #[test]
        fn traversal_matches_creation_minus_teardown(ops in collection::vec(op(), 0..40)) {
            let root = Context::global();
            let mut model: Vec<Context> = Vec::new();

            for op in ops {
                match op {
                    Op::Create(kind) => {
                        let sigil = TypeIdentity::synthesized(&format!("Kind{kind}"));
                        model.push(root.create_child_with_sigil(sigil).unwrap());
                    }
                    Op::TearDown(pick) => {
                        if !model.is_empty() {
                            let victim = model.remove(pick % model.len());
                            victim.teardown();
                        }
                    }
                }
                let seen = traverse(&root);
                prop_assert_eq!(seen.len(), model.len());
                prop_assert_eq!(root.child_count(), model.len());
                for (seen, expected) in seen.iter().zip(&model) {
                    prop_assert!(seen.ptr_eq(expected));
                }
            }
        }
    }
}

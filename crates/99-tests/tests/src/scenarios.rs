use context::Context;
use dispatch::{ContextDispatchExt, DispatchError, Filter};
use identity::TypeIdentity;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, PartialEq)]
struct A(u32);
#[derive(Debug, PartialEq)]
struct B(u32);
struct X;
struct Y;

struct F1;
struct F2;
struct G;
struct ProduceX;
struct Audit;

fn counting(hits: &Arc<AtomicUsize>) -> Arc<AtomicUsize> {
    Arc::clone(hits)
}

#[test]
fn source_feeds_consumer_once_per_packet() {
    let root = Context::global();
    let f1_hits = Arc::new(AtomicUsize::new(0));
    let f2_hits = Arc::new(AtomicUsize::new(0));

    let hits = counting(&f1_hits);
    root.register_filter(
        Filter::builder::<F1>()
            .output::<A>()
            .build(move |call| {
                hits.fetch_add(1, Ordering::SeqCst);
                call.put(A(7))?;
                Ok(())
            })
            .unwrap(),
    )
    .unwrap();
    let hits = counting(&f2_hits);
    root.register_filter(
        Filter::builder::<F2>()
            .input::<A>()
            .output::<B>()
            .build(move |call| {
                hits.fetch_add(1, Ordering::SeqCst);
                let b = B(call.get::<A>()?.0 + 1);
                call.put(b)?;
                Ok(())
            })
            .unwrap(),
    )
    .unwrap();

    let packet = root.new_packet().unwrap();
    assert_eq!(packet.get::<A>().as_deref(), Some(&A(7)));
    assert_eq!(packet.get::<B>().as_deref(), Some(&B(8)));
    assert!(packet.pending_filters().is_empty());
    assert_eq!(f1_hits.load(Ordering::SeqCst), 1);
    assert_eq!(f2_hits.load(Ordering::SeqCst), 1);

    // A late decoration of an unrelated type does not re-run either filter.
    packet.decorate(X).unwrap();
    assert_eq!(f1_hits.load(Ordering::SeqCst), 1);
    assert_eq!(f2_hits.load(Ordering::SeqCst), 1);

    let factory = root.find_packet_factory().unwrap();
    assert!(factory.registry().unsatisfied_inputs().is_empty());
    root.teardown();
}

#[test]
fn missing_producer_is_reported_and_blocks_the_filter() {
    let root = Context::global();
    let g_hits = Arc::new(AtomicUsize::new(0));

    root.register_filter(Filter::builder::<ProduceX>().output::<X>().build(|_| Ok(())).unwrap())
        .unwrap();
    let hits = counting(&g_hits);
    root.register_filter(
        Filter::builder::<G>()
            .input::<X>()
            .input::<Y>()
            .build(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap(),
    )
    .unwrap();

    let factory = root.find_packet_factory().unwrap();
    let expected: BTreeSet<_> = [TypeIdentity::of::<Y>()].into_iter().collect();
    assert_eq!(factory.registry().unsatisfied_inputs(), expected);

    // `ProduceX` never puts a value, so decorate X by hand.
    let packet = root.new_packet().unwrap();
    packet.decorate(X).unwrap();
    assert!(packet.has::<X>());
    assert_eq!(g_hits.load(Ordering::SeqCst), 0);
    let pending: Vec<String> = packet.pending_filters().iter().map(|d| d.name()).collect();
    assert_eq!(pending, ["G"]);

    let err = packet.decorate(X).unwrap_err();
    assert!(matches!(err, DispatchError::DuplicateDecoration { packet: 0, .. }));
    assert_eq!(g_hits.load(Ordering::SeqCst), 0);

    packet.decorate(Y).unwrap();
    assert_eq!(g_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn shared_decoration_appears_once_in_the_graph() {
    let root = Context::global();
    root.register_filter(Filter::builder::<F1>().output::<A>().build(|_| Ok(())).unwrap())
        .unwrap();
    root.register_filter(
        Filter::builder::<F2>()
            .input::<A>()
            .output::<B>()
            .build(|_| Ok(()))
            .unwrap(),
    )
    .unwrap();
    root.register_filter(Filter::builder::<Audit>().input::<A>().build(|_| Ok(())).unwrap())
        .unwrap();

    let graph = introspect::dependency_graph_string(&root);
    assert_eq!(graph.matches("label=\"A\"").count(), 1, "{graph}");
    assert_eq!(graph.matches("shape=oval").count(), 2, "{graph}");
    assert_eq!(graph.matches("shape=box").count(), 3, "{graph}");

    // Producer points at the decoration; consumers are pointed at by it.
    for edge in ["0 -> 1;", "1 -> 2;", "2 -> 3;", "1 -> 4;"] {
        assert!(graph.contains(edge), "missing `{edge}` in {graph}");
    }
    assert!(graph.starts_with("digraph Global {\n"));
    assert!(graph.ends_with("}\n"));
}

#[test]
fn diagnostics_follow_the_factory_up_the_tree() {
    struct Capture;

    let root = Context::global();
    let capture = root.create_child::<Capture>().unwrap();
    root.register_filter(Filter::builder::<F1>().output::<A>().build(|_| Ok(())).unwrap())
        .unwrap();
    root.register_filter(
        Filter::builder::<G>()
            .input::<X>()
            .input::<Y>()
            .build(|_| Ok(()))
            .unwrap(),
    )
    .unwrap();

    assert!(capture.find_packet_factory().is_some());
    assert_eq!(introspect::list_root_decorations(&capture), ["X", "Y"]);
    let descriptor = introspect::descriptor_by_name(&capture, "G").unwrap();
    assert_eq!(descriptor.arity(), 2);
    assert!(introspect::current_packet(&capture).is_none());

    let packet = capture.find_packet_factory().unwrap().new_packet().unwrap();
    let current = introspect::current_packet(&capture).unwrap();
    assert_eq!(current.sequence(), packet.sequence());
}

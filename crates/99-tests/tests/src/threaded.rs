use context::Context;
use crossbeam_channel::{unbounded, Receiver, Sender};
use dispatch::{ContextDispatchExt, Filter, Packet, PacketFactory};
use runnable::{RunState, Runnable, Worker, WorkerConfig, WorkerRuntime, WorkerThread};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Pool;

#[derive(Debug)]
struct Job(u64);
#[derive(Debug)]
struct Squared(u64);

struct Square;

#[derive(Debug)]
struct Tick(u64);
#[derive(Debug)]
struct Gap(u64);

struct GapMeter;

/// Turns each queued job into a packet and reports the squared result.
struct JobPump {
    factory: Arc<PacketFactory>,
    jobs: Receiver<u64>,
    results: Sender<(u64, u64, u64)>,
}

impl Worker for JobPump {
    fn poll(&mut self) -> usize {
        let Ok(job) = self.jobs.try_recv() else {
            return 0;
        };
        let Ok(packet) = self.factory.new_packet() else {
            return 0;
        };
        if packet.decorate(Job(job)).is_err() {
            return 0;
        }
        if let Some(squared) = packet.get::<Squared>() {
            let _ = self.results.send((job, squared.0, packet.sequence()));
        }
        1
    }

    fn name(&self) -> &'static str {
        "job-pump"
    }
}

/// Issues one packet per job and hands it back once decorated.
struct TickPump {
    factory: Arc<PacketFactory>,
    jobs: Receiver<()>,
    done: Sender<Packet>,
}

impl Worker for TickPump {
    fn poll(&mut self) -> usize {
        if self.jobs.try_recv().is_err() {
            return 0;
        }
        let Ok(packet) = self.factory.new_packet() else {
            return 0;
        };
        if packet.decorate(Tick(packet.sequence())).is_err() {
            return 0;
        }
        let _ = self.done.send(packet);
        1
    }

    fn name(&self) -> &'static str {
        "tick-pump"
    }
}

struct Pipeline {
    root: Context,
    pool: Context,
    threads: Vec<Arc<WorkerThread>>,
    jobs: Sender<u64>,
    results: Receiver<(u64, u64, u64)>,
    fired: Arc<AtomicUsize>,
}

fn pipeline(workers: usize) -> Pipeline {
    let root = Context::global();
    let pool = root.create_child::<Pool>().unwrap();
    let factory = root.packet_factory().unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&fired);
    factory
        .register(
            Filter::builder::<Square>()
                .input::<Job>()
                .output::<Squared>()
                .build(move |call| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let job = call.get::<Job>()?.0;
                    call.put(Squared(job * job))?;
                    Ok(())
                })
                .unwrap(),
        )
        .unwrap();

    let (jobs_tx, jobs_rx) = unbounded();
    let (results_tx, results_rx) = unbounded();
    let threads = (0..workers)
        .map(|index| {
            let mut runtime = WorkerRuntime::new();
            runtime.register(JobPump {
                factory: Arc::clone(&factory),
                jobs: jobs_rx.clone(),
                results: results_tx.clone(),
            });
            let thread = Arc::new(WorkerThread::new(
                format!("pump-{index}"),
                runtime,
                WorkerConfig::default(),
            ));
            pool.register_runnable(&thread).unwrap();
            thread
        })
        .collect();

    Pipeline {
        root,
        pool,
        threads,
        jobs: jobs_tx,
        results: results_rx,
        fired,
    }
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    done()
}

#[test]
fn packets_dispatch_in_parallel_across_workers() {
    const JOBS: u64 = 200;
    let pipeline = pipeline(4);
    pipeline.root.initiate().unwrap();
    assert!(wait_until(Duration::from_secs(5), || pipeline
        .threads
        .iter()
        .all(|thread| thread.is_running())));

    for job in 0..JOBS {
        pipeline.jobs.send(job).unwrap();
    }

    let mut seen = Vec::new();
    let complete = wait_until(Duration::from_secs(10), || {
        seen.extend(pipeline.results.try_iter());
        seen.len() as u64 == JOBS
    });
    assert!(complete, "only {} results arrived", seen.len());

    for &(job, squared, _) in &seen {
        assert_eq!(squared, job * job);
    }
    let jobs: BTreeSet<u64> = seen.iter().map(|&(job, _, _)| job).collect();
    assert_eq!(jobs, (0..JOBS).collect());
    let sequences: BTreeSet<u64> = seen.iter().map(|&(_, _, sequence)| sequence).collect();
    assert_eq!(sequences, (0..JOBS).collect());
    assert_eq!(pipeline.fired.load(Ordering::SeqCst) as u64, JOBS);

    let listing = {
        let mut buf = Vec::new();
        introspect::print_runnables(&mut buf, &pipeline.root).unwrap();
        String::from_utf8(buf).unwrap()
    };
    assert_eq!(listing.matches("[ RUNNING ](tid: ").count(), 4, "{listing}");
    assert!(listing.contains("WorkerThread (pump-0)"), "{listing}");

    pipeline.root.teardown();
}

#[test]
fn teardown_joins_worker_threads() {
    let pipeline = pipeline(3);
    pipeline.root.initiate().unwrap();
    assert!(wait_until(Duration::from_secs(5), || pipeline
        .threads
        .iter()
        .all(|thread| thread.thread_id().is_some())));

    pipeline.root.teardown();

    for thread in &pipeline.threads {
        assert_eq!(thread.state(), RunState::Stopped);
        assert!(!thread.is_running());
    }
    assert!(pipeline.pool.is_torn_down());
    assert_eq!(pipeline.root.child_count(), 0);
    assert!(pipeline.root.find_packet_factory().is_none());

    // Each worker owned a receiver; all of them are gone once the threads are joined.
    assert!(pipeline.jobs.send(1).is_err());
}

#[test]
fn shifted_filter_fires_for_every_packet_under_parallel_dispatch() {
    const PACKETS: usize = 300;
    let root = Context::global();
    let pool = root.create_child::<Pool>().unwrap();
    let factory = root.packet_factory().unwrap();
    factory
        .register(
            Filter::builder::<GapMeter>()
                .input::<Tick>()
                .prev::<Tick>(1)
                .output::<Gap>()
                .build(|call| {
                    let gap = call.get::<Tick>()?.0 - call.prev::<Tick>(1)?.0;
                    call.put(Gap(gap))?;
                    Ok(())
                })
                .unwrap(),
        )
        .unwrap();

    let (jobs_tx, jobs_rx) = unbounded();
    let (done_tx, done_rx) = unbounded();
    let threads: Vec<_> = (0..4)
        .map(|index| {
            let mut runtime = WorkerRuntime::new();
            runtime.register(TickPump {
                factory: Arc::clone(&factory),
                jobs: jobs_rx.clone(),
                done: done_tx.clone(),
            });
            let thread = Arc::new(WorkerThread::new(
                format!("tick-{index}"),
                runtime,
                WorkerConfig::default(),
            ));
            pool.register_runnable(&thread).unwrap();
            thread
        })
        .collect();
    root.initiate().unwrap();

    for _ in 0..PACKETS {
        jobs_tx.send(()).unwrap();
    }
    let mut packets: Vec<Packet> = Vec::new();
    let complete = wait_until(Duration::from_secs(10), || {
        packets.extend(done_rx.try_iter());
        packets.len() == PACKETS
    });
    assert!(complete, "only {} packets came back", packets.len());

    packets.sort_by_key(Packet::sequence);
    assert!(!packets[0].has::<Gap>());
    for packet in &packets[1..] {
        let gap = packet.get::<Gap>();
        assert_eq!(gap.map(|gap| gap.0), Some(1), "packet {}", packet.sequence());
    }

    root.teardown();
    assert!(threads.iter().all(|thread| thread.state() == RunState::Stopped));
}

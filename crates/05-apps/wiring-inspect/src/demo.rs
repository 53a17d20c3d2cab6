//! Sample capture pipeline used by the inspector commands.
//!
//! ```text
//! Global        Calibration, PacketFactory, pipeline filters
//! |-- Capture   packet pumps (one WorkerThread each)
//! |   *-- Tracking   MotionEstimator component
//! *-- Telemetry reporter thread
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _, Result};
use context::Context;
use crossbeam_channel::{Receiver, Sender};
use dispatch::{
    AutoFilter, ContextDispatchExt, DispatchResult, FactoryConfig, Filter, FilterBuilder,
    FilterCall, Packet, PacketFactory,
};
use parking_lot::Mutex;
use runnable::{Worker, WorkerConfig, WorkerRuntime, WorkerThread};
use tracing::{debug, info, warn};

pub struct Capture;
pub struct Tracking;
pub struct Telemetry;

#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    pub samples: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CleanFrame {
    pub samples: Vec<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Motion {
    pub dx: i64,
}

/// Supplied by the application, never by a filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub gain: i64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Annotated {
    pub sequence: u64,
    pub motion: i64,
    pub score: i64,
}

pub struct FrameSource {
    width: usize,
}

impl AutoFilter for FrameSource {
    fn declare(builder: FilterBuilder) -> FilterBuilder {
        builder.output::<RawFrame>()
    }

    fn filter(&self, call: &mut FilterCall<'_>) -> anyhow::Result<()> {
        let offset = usize::try_from(call.sequence().wrapping_mul(3) % 11)?;
        let samples = (0..11).cycle().skip(offset).take(self.width).collect();
        call.put(RawFrame { samples })?;
        Ok(())
    }
}

pub struct Denoise;

impl AutoFilter for Denoise {
    fn declare(builder: FilterBuilder) -> FilterBuilder {
        builder.input::<RawFrame>().output::<CleanFrame>()
    }

    fn filter(&self, call: &mut FilterCall<'_>) -> anyhow::Result<()> {
        let samples = call
            .get::<RawFrame>()?
            .samples
            .iter()
            .map(|&sample| sample.clamp(1, 9))
            .collect();
        call.put(CleanFrame { samples })?;
        Ok(())
    }
}

/// Removes the frame's offset in place.
pub struct Stabilize;

impl AutoFilter for Stabilize {
    fn declare(builder: FilterBuilder) -> FilterBuilder {
        builder.in_out::<CleanFrame>()
    }

    fn filter(&self, call: &mut FilterCall<'_>) -> anyhow::Result<()> {
        let frame = call.get::<CleanFrame>()?;
        let floor = frame.samples.iter().copied().min().unwrap_or(0);
        let samples = frame.samples.iter().map(|sample| sample - floor).collect();
        call.put(CleanFrame { samples })?;
        Ok(())
    }
}

pub struct MotionEstimator;

impl AutoFilter for MotionEstimator {
    fn declare(builder: FilterBuilder) -> FilterBuilder {
        builder
            .input::<CleanFrame>()
            .prev::<CleanFrame>(1)
            .output::<Motion>()
    }

    fn filter(&self, call: &mut FilterCall<'_>) -> anyhow::Result<()> {
        let energy = |frame: &CleanFrame| frame.samples.iter().map(|&s| i64::from(s)).sum::<i64>();
        let dx = energy(call.get::<CleanFrame>()?) - energy(call.prev::<CleanFrame>(1)?);
        call.put(Motion { dx })?;
        Ok(())
    }
}

pub struct Overlay;

impl AutoFilter for Overlay {
    fn declare(builder: FilterBuilder) -> FilterBuilder {
        builder
            .input::<Motion>()
            .input::<Calibration>()
            .output::<Annotated>()
    }

    fn filter(&self, call: &mut FilterCall<'_>) -> anyhow::Result<()> {
        let motion = call.get::<Motion>()?.dx;
        let gain = call.get::<Calibration>()?.gain;
        let annotated = Annotated {
            sequence: call.sequence(),
            motion,
            score: motion * gain,
        };
        call.put(annotated)?;
        Ok(())
    }
}

/// Outcome of one packet request.
#[derive(Clone, Debug, PartialEq)]
pub struct PacketReport {
    pub sequence: Option<u64>,
    pub annotated: Option<Annotated>,
    pub error: Option<String>,
}

impl PacketReport {
    /// Reads the outcome once every packet up to this one has been decorated.
    fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Dispatched(packet) => Self {
                sequence: Some(packet.sequence()),
                annotated: packet.get::<Annotated>().map(|annotated| *annotated),
                error: None,
            },
            Outcome::Failed(error) => Self {
                sequence: None,
                annotated: None,
                error: Some(error.clone()),
            },
        }
    }
}

// A packet may be annotated after its pump moves on, when its predecessor
// finishes later on another thread; the report is built at collection time.
enum Outcome {
    Dispatched(Packet),
    Failed(String),
}

struct PacketPump {
    factory: Arc<PacketFactory>,
    calibration: Arc<Calibration>,
    jobs: Receiver<()>,
    outcomes: Sender<Outcome>,
}

impl PacketPump {
    fn process(&self) -> DispatchResult<Packet> {
        let packet = self.factory.new_packet()?;
        packet.decorate_arc(Arc::clone(&self.calibration))?;
        Ok(packet)
    }
}

impl Worker for PacketPump {
    fn poll(&mut self) -> usize {
        if self.jobs.try_recv().is_err() {
            return 0;
        }
        let outcome = match self.process() {
            Ok(packet) => Outcome::Dispatched(packet),
            Err(err) => {
                warn!(error = %err, "packet dispatch failed");
                Outcome::Failed(err.to_string())
            }
        };
        if self.outcomes.send(outcome).is_err() {
            debug!("outcome channel closed");
        }
        1
    }

    fn name(&self) -> &'static str {
        "packet-pump"
    }
}

struct Reporter {
    outcomes: Receiver<Outcome>,
    collected: Arc<Mutex<Vec<Outcome>>>,
}

impl Worker for Reporter {
    fn poll(&mut self) -> usize {
        let mut progressed = 0;
        while let Ok(outcome) = self.outcomes.try_recv() {
            if let Outcome::Dispatched(packet) = &outcome {
                info!(sequence = packet.sequence(), "packet dispatched");
            }
            self.collected.lock().push(outcome);
            progressed += 1;
        }
        progressed
    }

    fn name(&self) -> &'static str {
        "reporter"
    }
}

/// Settings for [`Demo::build`].
#[derive(Clone, Debug)]
pub struct DemoConfig {
    pub workers: usize,
    pub frame_width: usize,
    pub gain: i64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            frame_width: 16,
            gain: 3,
        }
    }
}

pub struct Demo {
    pub root: Context,
    pub capture: Context,
    pub tracking: Context,
    pub telemetry: Context,
    factory: Arc<PacketFactory>,
    jobs: Sender<()>,
    collected: Arc<Mutex<Vec<Outcome>>>,
    threads: Vec<Arc<WorkerThread>>,
}

impl Demo {
    pub fn build(config: &DemoConfig) -> Result<Self> {
        let root = Context::global();
        let calibration = root.inject(Calibration { gain: config.gain })?;
        let factory = root.install_packet_factory(FactoryConfig { min_history: 1 })?;

        root.inject_filter(FrameSource {
            width: config.frame_width,
        })?;
        root.inject_filter(Denoise)?;
        root.inject_filter(Stabilize)?;

        let capture = root.create_child::<Capture>()?;
        let tracking = capture.create_child::<Tracking>()?;
        let telemetry = root.create_child::<Telemetry>()?;

        // The estimator lives with tracking but feeds the shared factory.
        let estimator = tracking.inject(MotionEstimator)?;
        factory.register(Filter::from_component(estimator)?)?;
        root.inject_filter(Overlay)?;

        let (jobs, job_queue) = crossbeam_channel::unbounded();
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut threads = Vec::with_capacity(config.workers + 1);

        for index in 0..config.workers {
            let mut runtime = WorkerRuntime::new();
            runtime.register(PacketPump {
                factory: Arc::clone(&factory),
                calibration: Arc::clone(&calibration),
                jobs: job_queue.clone(),
                outcomes: outcome_tx.clone(),
            });
            let thread = Arc::new(WorkerThread::new(
                format!("packet-pump-{index}"),
                runtime,
                WorkerConfig::default(),
            ));
            capture.register_runnable(&thread)?;
            threads.push(thread);
        }

        let mut runtime = WorkerRuntime::new();
        runtime.register(Reporter {
            outcomes: outcome_rx,
            collected: Arc::clone(&collected),
        });
        let reporter = Arc::new(WorkerThread::new("reporter", runtime, WorkerConfig::default()));
        telemetry.register_runnable(&reporter)?;
        threads.push(reporter);

        Ok(Self {
            root,
            capture,
            tracking,
            telemetry,
            factory,
            jobs,
            collected,
            threads,
        })
    }

    /// Starts every runnable in the tree and freezes the filter set.
    pub fn start(&self) -> Result<()> {
        self.root.initiate()?;
        Ok(())
    }

    /// Factory shared by every pump.
    pub fn factory(&self) -> &Arc<PacketFactory> {
        &self.factory
    }

    pub fn worker_count(&self) -> usize {
        self.threads.len()
    }

    /// Requests `packets` packets and waits for all of their reports.
    pub fn pump(&self, packets: usize, timeout: Duration) -> Result<Vec<PacketReport>> {
        let already = self.collected.lock().len();
        for _ in 0..packets {
            self.jobs
                .send(())
                .context("packet pumps have shut down")?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            {
                let collected = self.collected.lock();
                if collected.len() >= already + packets {
                    let mut reports: Vec<PacketReport> = collected[already..]
                        .iter()
                        .map(PacketReport::from_outcome)
                        .collect();
                    reports.sort_by_key(|report| report.sequence);
                    return Ok(reports);
                }
            }
            if Instant::now() >= deadline {
                bail!("timed out waiting for {packets} packet reports");
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Tears the tree down, stopping and joining every worker thread.
    pub fn shutdown(self) {
        self.root.teardown();
    }
}

//! Trigger gating and the shared start barrier, observed through full runs.

use parking_lot::Mutex;
use rig_common::record::Record;
use rig_engine::{
    Block, BlockError, BlockIo, CycleContext, LinkOptions, Orchestrator, Schedule, StopReason,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Counts its cycles and stops itself after `stop_after` of them.
/// With outputs, every cycle sends one pulse record.
struct Ticker {
    stop_after: u64,
    cycles: Arc<AtomicUsize>,
    data_seen: Arc<AtomicUsize>,
}

impl Ticker {
    fn new(stop_after: u64) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let cycles = Arc::new(AtomicUsize::new(0));
        let data_seen = Arc::new(AtomicUsize::new(0));
        let ticker = Self {
            stop_after,
            cycles: Arc::clone(&cycles),
            data_seen: Arc::clone(&data_seen),
        };
        (ticker, cycles, data_seen)
    }
}

impl Block for Ticker {
    fn kind(&self) -> &'static str {
        "ticker"
    }

    fn prepare(&mut self, _io: &mut BlockIo) -> Result<(), BlockError> {
        Ok(())
    }

    fn cycle(&mut self, io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        if ctx.loops() >= self.stop_after {
            return Err(BlockError::EndOfProcessing);
        }
        self.cycles.fetch_add(1, Ordering::SeqCst);
        for input in &io.inputs {
            while input.try_recv().is_some() {
                self.data_seen.fetch_add(1, Ordering::SeqCst);
            }
        }
        if io.has_outputs() {
            io.send(Record::stamped(ctx.elapsed()).with("pulse", ctx.loops() as f64))?;
        }
        Ok(())
    }

    fn finish(&mut self, _io: &mut BlockIo, _ctx: &CycleContext) {}
}

#[test]
fn trigger_runs_one_cycle_per_pulse() {
    let mut o = Orchestrator::new();
    let (pulser, _, _) = Ticker::new(10);
    o.add_block("pulser", Box::new(pulser), Schedule::at(100.0)).unwrap();

    let (gated, gated_cycles, gated_data) = Ticker::new(u64::MAX);
    o.add_block(
        "gated",
        Box::new(gated),
        Schedule::free().triggered_by("pulse"),
    )
    .unwrap();

    // Independent block outliving the pulser.
    let (steady, steady_cycles, _) = Ticker::new(40);
    o.add_block("steady", Box::new(steady), Schedule::at(100.0)).unwrap();

    o.connect("pulser", &["gated"], LinkOptions::named("pulse"))
        .unwrap();

    let summary = o.run().unwrap();
    assert_eq!(summary.reason, StopReason::Completed);

    // One cycle per pulse, then the closed trigger stops the block.
    assert_eq!(summary.report("pulser").unwrap().loops, 10);
    assert_eq!(summary.report("gated").unwrap().loops, 10);
    assert_eq!(gated_cycles.load(Ordering::SeqCst), 10);

    // Pulses are consumed by the runner, never delivered as data.
    assert_eq!(gated_data.load(Ordering::SeqCst), 0);

    // The trigger closing did not cut the rest of the pipeline short.
    assert_eq!(summary.report("steady").unwrap().loops, 40);
    assert_eq!(steady_cycles.load(Ordering::SeqCst), 40);
}

#[test]
fn trigger_with_no_pulse_keeps_block_idle() {
    let mut o = Orchestrator::new();
    let (pulser, _, _) = Ticker::new(0);
    o.add_block("pulser", Box::new(pulser), Schedule::free()).unwrap();

    let (gated, gated_cycles, _) = Ticker::new(u64::MAX);
    o.add_block(
        "gated",
        Box::new(gated),
        Schedule::free().triggered_by("pulse"),
    )
    .unwrap();
    o.connect("pulser", &["gated"], LinkOptions::named("pulse"))
        .unwrap();

    let summary = o.run().unwrap();
    assert_eq!(summary.reason, StopReason::Completed);
    assert_eq!(summary.report("gated").unwrap().loops, 0);
    assert_eq!(gated_cycles.load(Ordering::SeqCst), 0);
}

/// First cycle of one block: when it ran and the origin it was handed.
#[derive(Debug, Clone, Copy)]
struct FirstCycle {
    at: Instant,
    t0: Instant,
}

/// Records its first cycle, optionally after a slow `prepare()`.
struct Stamper {
    prepare_delay: Duration,
    first: Arc<Mutex<Vec<FirstCycle>>>,
}

impl Block for Stamper {
    fn kind(&self) -> &'static str {
        "stamper"
    }

    fn prepare(&mut self, _io: &mut BlockIo) -> Result<(), BlockError> {
        thread::sleep(self.prepare_delay);
        Ok(())
    }

    fn cycle(&mut self, _io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        if ctx.loops() == 0 {
            self.first.lock().push(FirstCycle {
                at: Instant::now(),
                t0: ctx.t0(),
            });
        }
        if ctx.loops() >= 3 {
            return Err(BlockError::EndOfProcessing);
        }
        Ok(())
    }

    fn finish(&mut self, _io: &mut BlockIo, _ctx: &CycleContext) {}
}

#[test]
fn slow_prepare_holds_every_first_cycle() {
    let delay = Duration::from_millis(200);
    let first = Arc::new(Mutex::new(Vec::new()));

    let mut o = Orchestrator::new();
    o.add_block(
        "slow",
        Box::new(Stamper {
            prepare_delay: delay,
            first: Arc::clone(&first),
        }),
        Schedule::free(),
    )
    .unwrap();
    for name in ["fast_a", "fast_b"] {
        o.add_block(
            name,
            Box::new(Stamper {
                prepare_delay: Duration::ZERO,
                first: Arc::clone(&first),
            }),
            Schedule::free(),
        )
        .unwrap();
    }
    o.add_block(
        "paced",
        Box::new(Stamper {
            prepare_delay: Duration::ZERO,
            first: Arc::clone(&first),
        }),
        Schedule::at(50.0),
    )
    .unwrap();

    let started = Instant::now();
    let summary = o.run().unwrap();
    assert_eq!(summary.reason, StopReason::Completed);
    let t0 = summary.t0.unwrap();
    assert!(t0 >= started + delay);

    let first = first.lock();
    assert_eq!(first.len(), 4);
    for cycle in first.iter() {
        assert!(
            cycle.at >= started + delay,
            "first cycle {:?} after start, before the slow prepare ended",
            cycle.at - started
        );
        assert!(cycle.at >= t0);
        assert_eq!(cycle.t0, t0);
    }
}

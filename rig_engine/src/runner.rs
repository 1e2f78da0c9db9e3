//! Per-block execution thread.
//!
//! A [`Runner`] owns one block and its links for the whole run. The thread
//! applies the block's scheduling hints, calls `prepare()`, waits at the
//! shared [`StartGate`] for `t0`, loops until something stops it, and always
//! ends with `finish()`:
//!
//! ```text
//! hints → prepare ─┬─ ok ──▶ gate.wait ─┬─ Go(t0) ──▶ loop ──▶ finish
//!                  │                    └─ Abort ─────────────▶ finish
//!                  └─ err ────────────────────────────────────▶ finish
//! ```
//!
//! Every lifecycle hook runs under `catch_unwind`, so a panicking block is
//! reported like any other fatal error and the remaining blocks still shut
//! down cleanly.

use crate::block::{Block, BlockError, BlockIo, CycleContext, LifecycleState};
use crate::cancel::CancelToken;
use crate::link::RecvError;
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ─── Scheduling ─────────────────────────────────────────────────────

/// What a block's end of processing does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnExhausted {
    /// Stop only this block; its outputs close.
    #[default]
    Stop,
    /// Request an error-free shutdown of every block.
    Cascade,
}

/// Scheduling policy of one block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    /// Target loop frequency [Hz]. `None` runs free.
    pub freq: Option<f64>,
    /// Niceness applied to the block thread.
    pub niceness: Option<i32>,
    /// CPU core the block thread is pinned to.
    pub cpu_core: Option<usize>,
    /// Name of the link gating each iteration.
    pub trigger: Option<String>,
    /// Reaction to end of processing.
    pub on_exhausted: OnExhausted,
}

impl Schedule {
    /// Free-running schedule.
    pub fn free() -> Self {
        Self::default()
    }

    /// Schedule paced at `freq` Hz.
    pub fn at(freq: f64) -> Self {
        Self {
            freq: Some(freq),
            ..Self::default()
        }
    }

    /// Gate each iteration on `link`.
    pub fn triggered_by(mut self, link: impl Into<String>) -> Self {
        self.trigger = Some(link.into());
        self
    }

    /// Set the end-of-processing policy.
    pub fn on_exhausted(mut self, policy: OnExhausted) -> Self {
        self.on_exhausted = policy;
        self
    }
}

/// Apply niceness and affinity to the calling thread. Failures only warn.
pub(crate) fn apply_hints(block: &str, schedule: &Schedule) {
    if let Some(nice) = schedule.niceness {
        match set_niceness(nice) {
            Ok(()) => debug!("Block '{}' niceness set to {}", block, nice),
            Err(e) => warn!("Block '{}': cannot set niceness {}: {}", block, nice, e),
        }
    }
    if let Some(core) = schedule.cpu_core {
        match set_affinity(core) {
            Ok(()) => debug!("Block '{}' pinned to CPU {}", block, core),
            Err(e) => warn!("Block '{}': cannot pin to CPU {}: {}", block, core, e),
        }
    }
}

/// Set the niceness of the calling thread only.
fn set_niceness(nice: i32) -> std::io::Result<()> {
    // SAFETY: gettid has no preconditions and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    // SAFETY: plain syscall on our own thread id.
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Pin the calling thread to `cpu`.
fn set_affinity(cpu: usize) -> Result<(), nix::Error> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset.set(cpu)?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
}

// ─── Pacing ─────────────────────────────────────────────────────────

/// Deadline scheduler anchored on `t0`.
///
/// Slot `n` is due at `t0 + n / freq`. Deadlines are absolute, so a slow
/// iteration does not shift the following ones. When the loop wakes more
/// than one period late, the slots it missed are skipped instead of being
/// run back to back.
#[derive(Debug, Clone)]
pub struct Pacer {
    t0: Instant,
    period_s: f64,
    slot: u64,
}

/// Result of one successful [`Pacer::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Delay between the deadline and the actual wake-up.
    pub latency: Duration,
    /// Slots skipped because the deadline was missed by more than a period.
    pub skipped: u64,
}

impl Pacer {
    /// Pacer for `freq` Hz.
    ///
    /// # Panics
    /// Panics if `freq` is not strictly positive and finite.
    pub fn new(t0: Instant, freq: f64) -> Self {
        assert!(
            freq.is_finite() && freq > 0.0,
            "pacing frequency must be positive"
        );
        Self {
            t0,
            period_s: 1.0 / freq,
            slot: 0,
        }
    }

    /// Loop period [s].
    pub fn period_s(&self) -> f64 {
        self.period_s
    }

    /// Index of the next slot.
    pub fn slot(&self) -> u64 {
        self.slot
    }

    /// Deadline of the next slot.
    pub fn deadline(&self) -> Instant {
        self.t0 + Duration::from_secs_f64(self.slot as f64 * self.period_s)
    }

    /// Sleep until the next slot is due.
    ///
    /// Returns `None` if `cancel` fired first.
    pub fn wait(&mut self, cancel: &CancelToken) -> Option<Tick> {
        let deadline = self.deadline();
        if !cancel.sleep_until(deadline) {
            return None;
        }
        let latency = Instant::now().saturating_duration_since(deadline);
        let late_s = latency.as_secs_f64();
        let skipped = if late_s > self.period_s {
            (late_s / self.period_s).floor() as u64
        } else {
            0
        };
        self.slot += 1 + skipped;
        Some(Tick { latency, skipped })
    }
}

// ─── Statistics ─────────────────────────────────────────────────────

/// Loop timing statistics of one block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleStats {
    /// Completed iterations.
    pub cycle_count: u64,
    /// Last iteration duration [ns].
    pub last_cycle_ns: u64,
    /// Minimum iteration duration [ns].
    pub min_cycle_ns: u64,
    /// Maximum iteration duration [ns].
    pub max_cycle_ns: u64,
    /// Running sum for average computation.
    pub sum_cycle_ns: u128,
    /// Slots skipped because a deadline was missed by more than a period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns].
    pub max_latency_ns: u64,
}

impl CycleStats {
    /// Record one iteration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration: Duration, latency: Duration) {
        let duration_ns = duration.as_nanos().min(u64::MAX as u128) as u64;
        let latency_ns = latency.as_nanos().min(u64::MAX as u128) as u64;
        if self.cycle_count == 0 || duration_ns < self.min_cycle_ns {
            self.min_cycle_ns = duration_ns;
        }
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += duration_ns as u128;
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    /// Average iteration duration [ns] (0 if no iteration ran).
    #[inline]
    pub fn avg_cycle_ns(&self) -> u64 {
        if self.cycle_count == 0 {
            0
        } else {
            (self.sum_cycle_ns / self.cycle_count as u128) as u64
        }
    }
}

/// Overrun warnings: the first 10, then every 1000th.
#[inline]
fn should_report_overrun(count: u64) -> bool {
    count <= 10 || count % 1000 == 0
}

// ─── Start barrier ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum GateState {
    Closed,
    Open(Instant),
    Aborted,
}

/// One-shot barrier releasing every prepared block with the shared `t0`.
#[derive(Debug)]
pub(crate) struct StartGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl StartGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Closed),
            released: Condvar::new(),
        }
    }

    /// Release every waiter with `t0`. Later calls are ignored.
    pub(crate) fn open(&self, t0: Instant) {
        let mut state = self.state.lock();
        if matches!(*state, GateState::Closed) {
            *state = GateState::Open(t0);
            self.released.notify_all();
        }
    }

    /// Release every waiter without a time origin.
    pub(crate) fn abort(&self) {
        let mut state = self.state.lock();
        if matches!(*state, GateState::Closed) {
            *state = GateState::Aborted;
            self.released.notify_all();
        }
    }

    /// Block until the gate opens (`Some(t0)`) or is aborted (`None`).
    pub(crate) fn wait(&self) -> Option<Instant> {
        let mut state = self.state.lock();
        loop {
            match *state {
                GateState::Closed => self.released.wait(&mut state),
                GateState::Open(t0) => return Some(t0),
                GateState::Aborted => return None,
            }
        }
    }
}

// ─── Runner ─────────────────────────────────────────────────────────

/// Why a block left its loop.
#[derive(Debug)]
pub enum StopCause {
    /// The block reported end of processing.
    Exhausted,
    /// The run was cancelled.
    Cancelled,
    /// The trigger link closed.
    TriggerClosed,
    /// The block raised a fatal error (panics included).
    Failed(BlockError),
}

/// Notifications sent by runners to the orchestrator.
#[derive(Debug)]
pub(crate) enum RunnerEvent {
    /// `prepare()` returned.
    Prepared {
        block: String,
        result: Result<(), BlockError>,
    },
    /// The block left its loop and is about to finish.
    Stopped {
        block: String,
        cause: StopCause,
        on_exhausted: OnExhausted,
    },
}

/// Final account of one block, returned when its thread is joined.
#[derive(Debug, Clone)]
pub struct BlockReport {
    /// Block name.
    pub name: String,
    /// Block kind.
    pub kind: &'static str,
    /// Completed `cycle()` calls.
    pub loops: u64,
    /// Loop timing.
    pub stats: CycleStats,
    /// State at thread exit; always `Terminated` unless the thread died.
    pub state: LifecycleState,
}

/// Owns one block for the lifetime of its thread.
pub(crate) struct Runner {
    pub(crate) name: String,
    pub(crate) block: Box<dyn Block>,
    pub(crate) io: BlockIo,
    pub(crate) schedule: Schedule,
    pub(crate) cancel: CancelToken,
    pub(crate) gate: Arc<StartGate>,
    pub(crate) events: Sender<RunnerEvent>,
}

impl Runner {
    /// Spawn the block thread.
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<BlockReport>> {
        thread::Builder::new()
            .name(format!("rig-{}", self.name))
            .spawn(move || self.run())
    }

    fn run(mut self) -> BlockReport {
        let kind = self.block.kind();
        let mut state = LifecycleState::Created;
        let mut stats = CycleStats::default();
        debug!("Block '{}' ({}) thread started", self.name, kind);

        apply_hints(&self.name, &self.schedule);

        let prepared = guarded(|| self.block.prepare(&mut self.io));
        let prepared_ok = prepared.is_ok();
        match &prepared {
            Ok(()) => self.transition(&mut state, LifecycleState::Prepared),
            Err(e) => error!("Block '{}' prepare failed: {}", self.name, e),
        }
        self.notify(RunnerEvent::Prepared {
            block: self.name.clone(),
            result: prepared,
        });

        let t0 = if prepared_ok { self.gate.wait() } else { None };

        let ctx = match t0 {
            Some(t0) => {
                self.transition(&mut state, LifecycleState::Running);
                let mut ctx = CycleContext::new(t0, self.cancel.clone());
                let cause = self.run_loop(&mut ctx, &mut stats);
                match &cause {
                    StopCause::Exhausted => info!(
                        "Block '{}' reached end of processing after {} loops",
                        self.name,
                        ctx.loops()
                    ),
                    StopCause::TriggerClosed => {
                        info!("Block '{}' trigger closed, stopping", self.name)
                    }
                    StopCause::Cancelled => debug!("Block '{}' cancelled", self.name),
                    StopCause::Failed(e) => error!("Block '{}' failed: {}", self.name, e),
                }
                self.notify(RunnerEvent::Stopped {
                    block: self.name.clone(),
                    cause,
                    on_exhausted: self.schedule.on_exhausted,
                });
                ctx
            }
            None => CycleContext::new(Instant::now(), self.cancel.clone()),
        };

        self.transition(&mut state, LifecycleState::Finishing);
        let finished = guarded(|| {
            self.block.finish(&mut self.io, &ctx);
            Ok(())
        });
        if let Err(e) = finished {
            error!("Block '{}' finish failed: {}", self.name, e);
        }
        self.io.close_outputs();
        self.transition(&mut state, LifecycleState::Terminated);

        if stats.cycle_count > 0 {
            info!(
                "Block '{}' finished: {} loops, avg {}ns, max {}ns, {} overruns",
                self.name,
                ctx.loops(),
                stats.avg_cycle_ns(),
                stats.max_cycle_ns,
                stats.overruns
            );
        } else {
            info!("Block '{}' finished without looping", self.name);
        }

        BlockReport {
            name: self.name,
            kind,
            loops: ctx.loops(),
            stats,
            state,
        }
    }

    fn run_loop(&mut self, ctx: &mut CycleContext, stats: &mut CycleStats) -> StopCause {
        let mut pacer = self.schedule.freq.map(|f| Pacer::new(ctx.t0(), f));

        loop {
            if self.cancel.is_cancelled() {
                return StopCause::Cancelled;
            }

            let mut latency = Duration::ZERO;
            if let Some(pacer) = pacer.as_mut() {
                let Some(tick) = pacer.wait(&self.cancel) else {
                    return StopCause::Cancelled;
                };
                latency = tick.latency;
                if tick.skipped > 0 {
                    let before = stats.overruns;
                    stats.overruns += tick.skipped;
                    if (before + 1..=stats.overruns).any(should_report_overrun) {
                        warn!(
                            "Block '{}' overrun: {:.3}ms late, {} slot(s) skipped ({} total)",
                            self.name,
                            latency.as_secs_f64() * 1e3,
                            tick.skipped,
                            stats.overruns
                        );
                    }
                }
            }

            if let Some(trigger) = &self.io.trigger {
                match trigger.recv_cancellable(&self.cancel) {
                    Ok(_) => {}
                    Err(RecvError::Closed) => return StopCause::TriggerClosed,
                    Err(RecvError::Cancelled) => return StopCause::Cancelled,
                }
            }

            let started = Instant::now();
            let io = &mut self.io;
            let block = &mut self.block;
            let result = guarded(|| block.cycle(io, ctx));
            match result {
                Ok(()) => {
                    ctx.advance();
                    stats.record(started.elapsed(), latency);
                }
                Err(BlockError::EndOfProcessing) => return StopCause::Exhausted,
                Err(BlockError::Interrupted) => return StopCause::Cancelled,
                Err(e) => return StopCause::Failed(e),
            }
        }
    }

    fn transition(&self, state: &mut LifecycleState, next: LifecycleState) {
        debug!("Block '{}': {:?} -> {:?}", self.name, state, next);
        *state = next;
    }

    fn notify(&self, event: RunnerEvent) {
        if self.events.send(event).is_err() {
            debug!("Block '{}': orchestrator no longer listening", self.name);
        }
    }
}

/// Run a lifecycle hook, turning a panic into a fatal runtime error.
fn guarded<T>(hook: impl FnOnce() -> Result<T, BlockError>) -> Result<T, BlockError> {
    catch_unwind(AssertUnwindSafe(hook)).unwrap_or_else(|payload| {
        Err(BlockError::Runtime(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

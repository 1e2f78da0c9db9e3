//! Block trait, lifecycle types and block-side I/O.
//!
//! A block is a unit of work scheduled on its own thread. The engine drives
//! every block through the same lifecycle:
//!
//! ```text
//! Created ──prepare()──▶ Prepared ──t0 barrier──▶ Running ──▶ Finishing ──finish()──▶ Terminated
//! ```
//!
//! `prepare()` and `finish()` run exactly once. `cycle()` runs repeatedly,
//! paced by the runner. Blocks never see each other; they only exchange
//! records through the links held in their [`BlockIo`].

use crate::cancel::CancelToken;
use crate::link::{LinkError, LinkRx, LinkTx, RecvError};
use crate::path::PathError;
use rig_common::config::ConfigError;
use rig_common::device::DeviceError;
use rig_common::record::Record;
use std::time::Instant;
use thiserror::Error;

/// Errors a block can raise from its lifecycle hooks.
#[derive(Debug, Error)]
pub enum BlockError {
    /// Invalid or missing block settings.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Device open or communication failure.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Link schema violation.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Path evaluation failure.
    #[error(transparent)]
    Path(#[from] PathError),

    /// File or stream I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A label the block needs is absent from its input data.
    #[error("label '{0}' is missing from the input data")]
    MissingLabel(String),

    /// The block has no more data to produce. Not fatal.
    #[error("end of processing")]
    EndOfProcessing,

    /// A blocking wait observed the shutdown signal. Not fatal.
    #[error("interrupted by shutdown")]
    Interrupted,

    /// Unexpected runtime failure.
    #[error("{0}")]
    Runtime(String),
}

impl BlockError {
    /// Whether the error must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::EndOfProcessing | Self::Interrupted)
    }
}

impl From<RecvError> for BlockError {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Closed => Self::EndOfProcessing,
            RecvError::Cancelled => Self::Interrupted,
        }
    }
}

/// Lifecycle state of a block, tracked by its runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet prepared.
    Created,
    /// `prepare()` succeeded; waiting for `t0`.
    Prepared,
    /// Looping.
    Running,
    /// `finish()` in progress.
    Finishing,
    /// `finish()` returned; links released.
    Terminated,
}

/// Links owned by one block.
#[derive(Debug, Default)]
pub struct BlockIo {
    /// Data inputs, in connection order.
    pub inputs: Vec<LinkRx>,
    /// Outputs; every record sent goes to all of them.
    pub outputs: Vec<LinkTx>,
    /// Synchronization input consumed by the runner. Its payload is discarded.
    pub trigger: Option<LinkRx>,
}

impl BlockIo {
    /// Whether the block has at least one data input.
    pub fn has_inputs(&self) -> bool {
        !self.inputs.is_empty()
    }

    /// Whether the block has at least one output.
    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Send `record` on every output link. Never blocks.
    pub fn send(&mut self, record: Record) -> Result<(), LinkError> {
        if let Some((last, rest)) = self.outputs.split_last_mut() {
            for output in rest {
                output.send(record.clone())?;
            }
            last.send(record)?;
        }
        Ok(())
    }

    /// Latest values of every input merged into one record.
    ///
    /// Inputs that never delivered anything are waited on, so the first call
    /// blocks until each input produced once. Later calls never block.
    /// With no inputs the result is empty.
    ///
    /// # Errors
    /// `BlockError::Interrupted` if shutdown is requested while waiting,
    /// `BlockError::EndOfProcessing` if an input closes before its first record.
    pub fn get_last(&self, cancel: &CancelToken) -> Result<Record, BlockError> {
        let mut merged = Record::new();
        for input in &self.inputs {
            let latest = match input.recv_last() {
                Some(record) => record,
                None => input.recv_cancellable(cancel)?,
            };
            merged.merge(&latest);
        }
        Ok(merged)
    }

    /// Close every output link, waking downstream blocked receivers.
    pub fn close_outputs(&mut self) {
        self.outputs.clear();
    }
}

/// Run-time context handed to `cycle()` and `finish()`.
#[derive(Debug, Clone)]
pub struct CycleContext {
    t0: Instant,
    loops: u64,
    cancel: CancelToken,
}

impl CycleContext {
    /// Context for a run whose time origin is `t0`.
    pub fn new(t0: Instant, cancel: CancelToken) -> Self {
        Self {
            t0,
            loops: 0,
            cancel,
        }
    }

    /// Shared time origin.
    pub fn t0(&self) -> Instant {
        self.t0
    }

    /// Seconds elapsed since `t0`.
    pub fn elapsed(&self) -> f64 {
        self.t0.elapsed().as_secs_f64()
    }

    /// Seconds between `t0` and `at`.
    pub fn since_t0(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.t0).as_secs_f64()
    }

    /// Completed `cycle()` calls.
    pub fn loops(&self) -> u64 {
        self.loops
    }

    /// Run-wide shutdown signal.
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn advance(&mut self) {
        self.loops += 1;
    }
}

/// A pipeline unit.
///
/// # Lifecycle
///
/// 1. `prepare()` - Once, before the shared time origin exists
/// 2. `cycle()` - Repeatedly, after every block prepared
/// 3. `finish()` - Once, on every exit path, including after a failed
///    `prepare()` or a fatal error elsewhere in the pipeline
///
/// # Timing Contracts
///
/// | Operation | Blocking allowed | Notes |
/// |-----------|------------------|-------|
/// | `prepare()` | Yes | Open devices, validate settings |
/// | `cycle()` | Only via links/devices | Must observe `ctx.cancel()` when waiting |
/// | `finish()` | Yes | Must not fail; leave actuators safe |
pub trait Block: Send {
    /// Block kind identifier (e.g. "generator", "io").
    fn kind(&self) -> &'static str;

    /// Allocate resources and open devices.
    ///
    /// # Errors
    /// Any error aborts the run before a single block loops.
    fn prepare(&mut self, io: &mut BlockIo) -> Result<(), BlockError>;

    /// Execute one unit of work.
    ///
    /// # Errors
    /// `BlockError::EndOfProcessing` when there is nothing left to do; every
    /// other fatal error stops the whole run.
    fn cycle(&mut self, io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError>;

    /// Release resources and return actuators to a safe state.
    fn finish(&mut self, io: &mut BlockIo, ctx: &CycleContext);
}

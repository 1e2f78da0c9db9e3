//! Pipeline orchestrator.
//!
//! Builds the block graph, spawns one runner thread per block, performs the
//! single start barrier and supervises the run until every block finished.
//!
//! # Run sequence
//!
//! ```text
//! spawn all ──▶ collect N × Prepared ─┬─ all ok ──▶ gate.open(t0) ──▶ supervise ──▶ join all
//!                                     └─ any err ─▶ gate.abort() + cancel ───────────▶ join all
//! ```
//!
//! While supervising, a fatal error from any block or the cascading end of
//! processing of a block cancels the shared [`CancelToken`]; every other
//! block then leaves its loop and runs `finish()` before being joined.

use crate::block::{Block, BlockError, BlockIo};
use crate::blocks;
use crate::cancel::CancelToken;
use crate::link::link;
use crate::pipeline::PipelineConfig;
use crate::registry::DeviceRegistry;
use crate::runner::{
    BlockReport, OnExhausted, Runner, RunnerEvent, Schedule, StartGate, StopCause,
};
use rig_common::config::ConfigError;
use rig_common::consts::{DEFAULT_LINK_CAPACITY, MAX_LINK_CAPACITY};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors returned by the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid graph or block configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A block failed in `prepare()`; no block ran.
    #[error("block '{block}' failed to prepare: {source}")]
    PrepareFailed {
        /// Block name.
        block: String,
        /// Underlying error.
        #[source]
        source: BlockError,
    },

    /// A block raised a fatal error while running.
    #[error("block '{block}' failed: {source}")]
    BlockFailed {
        /// Block name.
        block: String,
        /// Underlying error.
        #[source]
        source: BlockError,
    },

    /// The OS refused to start a block thread.
    #[error("cannot spawn block '{block}': {source}")]
    Spawn {
        /// Block name.
        block: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A block thread died outside of its guarded hooks.
    #[error("block '{0}' thread panicked")]
    Panicked(String),
}

/// Why a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A block with the `cascade` policy reached end of processing.
    Exhausted {
        /// Block that ran out of work.
        block: String,
    },
    /// The cancel token was fired from outside (e.g. Ctrl-C).
    Interrupted,
    /// Every block stopped on its own.
    Completed,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Why the run ended.
    pub reason: StopReason,
    /// Shared time origin, if the barrier was released.
    pub t0: Option<Instant>,
    /// Per-block accounts, in declaration order.
    pub reports: Vec<BlockReport>,
}

impl RunSummary {
    /// Report of the block named `name`.
    pub fn report(&self, name: &str) -> Option<&BlockReport> {
        self.reports.iter().find(|r| r.name == name)
    }
}

/// Options of a new link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Link name. Defaults to `from->to1,to2`.
    pub name: Option<String>,
    /// Per-endpoint queue capacity.
    pub capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            name: None,
            capacity: DEFAULT_LINK_CAPACITY,
        }
    }
}

impl LinkOptions {
    /// Options for a link called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the per-endpoint capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

struct Node {
    name: String,
    block: Box<dyn Block>,
    io: BlockIo,
    schedule: Schedule,
}

/// Builds and runs a block pipeline.
pub struct Orchestrator {
    nodes: Vec<Node>,
    links: HashSet<String>,
    cancel: CancelToken,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(msg: String) -> EngineError {
    EngineError::Config(ConfigError::ValidationError(msg))
}

impl Orchestrator {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            links: HashSet::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Build the pipeline described by `config`.
    ///
    /// # Errors
    /// `EngineError::Config` if the configuration is invalid, a device is
    /// unknown or a path does not parse.
    pub fn from_config(
        config: &PipelineConfig,
        devices: &DeviceRegistry,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let mut orchestrator = Self::new();
        for block in &config.blocks {
            let instance = blocks::build(block, devices)?;
            orchestrator.add_block(&block.name, instance, block.schedule())?;
        }
        for l in &config.links {
            let options = LinkOptions {
                name: Some(l.link_name()),
                capacity: l.effective_capacity(),
            };
            orchestrator.connect(&l.from, l.to.as_slice(), options)?;
        }
        info!(
            "Pipeline '{}' built: {} blocks, {} links",
            config.shared.name,
            orchestrator.nodes.len(),
            orchestrator.links.len()
        );
        Ok(orchestrator)
    }

    /// Add a block.
    ///
    /// # Errors
    /// `EngineError::Config` for a duplicate name or an invalid frequency.
    pub fn add_block(
        &mut self,
        name: impl Into<String>,
        block: Box<dyn Block>,
        schedule: Schedule,
    ) -> Result<(), EngineError> {
        let name = name.into();
        if self.nodes.iter().any(|n| n.name == name) {
            return Err(invalid(format!("duplicate block name '{name}'")));
        }
        if let Some(freq) = schedule.freq {
            if !(freq.is_finite() && freq > 0.0) {
                return Err(invalid(format!(
                    "block '{name}': freq must be positive, got {freq}"
                )));
            }
        }
        debug!("Block '{}' ({}) added: {:?}", name, block.kind(), schedule);
        self.nodes.push(Node {
            name,
            block,
            io: BlockIo::default(),
            schedule,
        });
        Ok(())
    }

    fn index_of(&self, name: &str) -> Result<usize, EngineError> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .ok_or_else(|| invalid(format!("unknown block '{name}'")))
    }

    /// Connect `from` to every block of `to` with one link.
    ///
    /// A consumer whose schedule names this link as trigger receives the
    /// endpoint as its trigger instead of a data input. Returns the link name.
    ///
    /// # Errors
    /// `EngineError::Config` for unknown blocks, a duplicate link name, an
    /// invalid capacity or a second trigger on the same block.
    pub fn connect<S: AsRef<str>>(
        &mut self,
        from: &str,
        to: &[S],
        options: LinkOptions,
    ) -> Result<String, EngineError> {
        let producer = self.index_of(from)?;
        if to.is_empty() {
            return Err(invalid(format!("link from '{from}' has no consumer")));
        }
        let consumers = to
            .iter()
            .map(|name| self.index_of(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if consumers.contains(&producer) {
            return Err(invalid(format!("block '{from}' cannot consume its own link")));
        }

        let name = options.name.unwrap_or_else(|| {
            let targets: Vec<&str> = to.iter().map(AsRef::as_ref).collect();
            format!("{from}->{}", targets.join(","))
        });
        if options.capacity == 0 || options.capacity > MAX_LINK_CAPACITY {
            return Err(invalid(format!(
                "link '{name}': capacity must be in 1..={MAX_LINK_CAPACITY}"
            )));
        }
        if !self.links.insert(name.clone()) {
            return Err(invalid(format!("duplicate link name '{name}'")));
        }

        let mut tx = link(name.clone(), options.capacity);
        for &consumer in &consumers {
            let rx = tx.subscribe();
            let node = &mut self.nodes[consumer];
            if node.schedule.trigger.as_deref() == Some(name.as_str()) {
                if node.io.trigger.is_some() {
                    return Err(invalid(format!("block '{}' has two triggers", node.name)));
                }
                node.io.trigger = Some(rx);
            } else {
                node.io.inputs.push(rx);
            }
        }
        debug!("Link '{}' connected to {} consumer(s)", name, tx.consumer_count());
        self.nodes[producer].io.outputs.push(tx);
        Ok(name)
    }

    /// Token cancelling the run when fired (e.g. from a signal handler).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Names of the declared blocks, in spawn order.
    pub fn block_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    fn check_triggers(&self) -> Result<(), EngineError> {
        for node in &self.nodes {
            if let Some(trigger) = &node.schedule.trigger {
                if node.io.trigger.is_none() {
                    return Err(invalid(format!(
                        "block '{}': trigger '{trigger}' is not a link feeding this block",
                        node.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run the pipeline to completion.
    ///
    /// Returns once every spawned block has run `finish()` and been joined.
    ///
    /// # Errors
    /// The first prepare or runtime failure. Other blocks were still shut
    /// down and finished when this returns.
    pub fn run(self) -> Result<RunSummary, EngineError> {
        self.check_triggers()?;
        if self.nodes.is_empty() {
            return Err(invalid("pipeline has no block".to_string()));
        }

        lock_memory();

        let Self { nodes, cancel, .. } = self;
        let (events_tx, events) = crossbeam_channel::unbounded();
        let gate = Arc::new(StartGate::new());
        let mut handles = Vec::with_capacity(nodes.len());
        let mut first_error = None;

        for node in nodes {
            let name = node.name.clone();
            info!("Spawning block '{}' ({})", name, node.block.kind());
            let runner = Runner {
                name: node.name,
                block: node.block,
                io: node.io,
                schedule: node.schedule,
                cancel: cancel.clone(),
                gate: Arc::clone(&gate),
                events: events_tx.clone(),
            };
            match runner.spawn() {
                Ok(handle) => handles.push((name, handle)),
                Err(source) => {
                    error!("Cannot spawn block '{}': {}", name, source);
                    first_error = Some(EngineError::Spawn {
                        block: name,
                        source,
                    });
                    break;
                }
            }
        }
        drop(events_tx);

        let mut prepared = 0;
        while prepared < handles.len() {
            match events.recv() {
                Ok(RunnerEvent::Prepared { block, result }) => {
                    prepared += 1;
                    if let Err(source) = result {
                        if first_error.is_none() {
                            first_error = Some(EngineError::PrepareFailed { block, source });
                        }
                    }
                }
                Ok(RunnerEvent::Stopped { block, .. }) => {
                    debug!("Block '{}' stopped before the barrier", block);
                }
                Err(_) => break,
            }
        }

        if first_error.is_none() && cancel.is_cancelled() {
            warn!("Interrupted during prepare, aborting start");
            gate.abort();
            let reports = join_all(handles, &mut first_error);
            return match first_error {
                Some(e) => Err(e),
                None => Ok(RunSummary {
                    reason: StopReason::Interrupted,
                    t0: None,
                    reports,
                }),
            };
        }

        if let Some(e) = first_error.take() {
            error!("Start aborted: {}", e);
            gate.abort();
            cancel.cancel();
            join_all(handles, &mut first_error);
            return Err(e);
        }

        let t0 = Instant::now();
        gate.open(t0);
        info!("All {} blocks prepared, t0 released", handles.len());

        let mut reason = None;
        let mut running = handles.len();
        while running > 0 {
            match events.recv() {
                Ok(RunnerEvent::Stopped {
                    block,
                    cause,
                    on_exhausted,
                }) => {
                    running -= 1;
                    match cause {
                        StopCause::Failed(source) => {
                            if first_error.is_none() {
                                error!("Block '{}' failed, stopping the pipeline", block);
                                first_error = Some(EngineError::BlockFailed { block, source });
                            }
                            cancel.cancel();
                        }
                        StopCause::Exhausted if on_exhausted == OnExhausted::Cascade => {
                            if !cancel.is_cancelled() {
                                info!("Block '{}' exhausted, stopping the pipeline", block);
                                reason = Some(StopReason::Exhausted { block });
                                cancel.cancel();
                            }
                        }
                        StopCause::Exhausted | StopCause::TriggerClosed => {
                            debug!("Block '{}' stopped on its own", block);
                        }
                        StopCause::Cancelled => {}
                    }
                }
                Ok(RunnerEvent::Prepared { .. }) => {}
                Err(_) => break,
            }
        }

        let reports = join_all(handles, &mut first_error);
        if let Some(e) = first_error {
            return Err(e);
        }
        let reason = reason.unwrap_or(if cancel.is_cancelled() {
            StopReason::Interrupted
        } else {
            StopReason::Completed
        });
        info!("Pipeline stopped: {:?}", reason);
        Ok(RunSummary {
            reason,
            t0: Some(t0),
            reports,
        })
    }
}

fn join_all(
    handles: Vec<(String, std::thread::JoinHandle<BlockReport>)>,
    first_error: &mut Option<EngineError>,
) -> Vec<BlockReport> {
    let mut reports = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        match handle.join() {
            Ok(report) => {
                debug!("Block '{}' joined", name);
                reports.push(report);
            }
            Err(_) => {
                error!("Block '{}' thread panicked", name);
                if first_error.is_none() {
                    *first_error = Some(EngineError::Panicked(name));
                }
            }
        }
    }
    reports
}

/// Lock all current and future memory pages before spawning blocks.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn lock_memory() {
    use nix::sys::mman::{MlockAllFlags, mlockall};
    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => info!("Process memory locked"),
        Err(e) => warn!("mlockall failed: {}", e),
    }
}

#[cfg(not(feature = "rt"))]
fn lock_memory() {}

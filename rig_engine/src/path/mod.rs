//! Command path state machine.
//!
//! A [`Path`] walks a fixed list of segments strictly in order. Each call to
//! [`Path::get_cmd`] checks the active segment's end condition, moves to the
//! next segment when it is met, and returns the command for the current
//! instant. When the last segment ends the path reports
//! [`PathStep::Exhausted`], which the generator block turns into the
//! end-of-processing signal.
//!
//! ```text
//!  segment[0] ──done──▶ segment[1] ──done──▶ … ──done──▶ Exhausted
//! ```
//!
//! A newly activated segment starts at the instant the previous one ended,
//! from the previous segment's last command unless it sets its own start.
//! `delay=` conditions count from the start of the path, which is the
//! activation of the first segment (again after [`Path::reset`]).

pub mod condition;
pub mod segment;

pub use condition::{Comparator, Condition};
pub use segment::{Profile, Segment, SegmentConfig, SegmentPlan, SegmentStep};

use rig_common::record::Record;
use thiserror::Error;
use tracing::debug;

/// Errors raised while building or evaluating a path.
#[derive(Debug, Clone, Error)]
pub enum PathError {
    /// A condition string could not be parsed.
    #[error("invalid condition '{condition}': {reason}")]
    InvalidCondition {
        /// Offending text.
        condition: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A segment has invalid parameters.
    #[error("invalid segment #{index}: {reason}")]
    InvalidSegment {
        /// Position in the path.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// A path needs at least one segment.
    #[error("path has no segments")]
    Empty,

    /// A condition refers to a label absent from the input data.
    #[error("condition label '{0}' is missing from the input data")]
    MissingLabel(String),

    /// A condition refers to a label that holds no scalar.
    #[error("condition label '{0}' holds no comparable value")]
    NotComparable(String),
}

/// Outcome of one [`Path::get_cmd`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathStep {
    /// Command to apply now.
    Cmd(f64),
    /// Every segment has ended.
    Exhausted,
}

/// Sequential segment state machine.
#[derive(Debug, Clone)]
pub struct Path {
    plans: Vec<SegmentPlan>,
    initial_cmd: f64,
    index: usize,
    active: Option<Segment>,
    started_at: Option<f64>,
    last_cmd: f64,
}

impl Path {
    /// Build a path from validated plans.
    ///
    /// `initial_cmd` is the continuity value of the first segment.
    pub fn new(plans: Vec<SegmentPlan>, initial_cmd: f64) -> Result<Self, PathError> {
        if plans.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self {
            plans,
            initial_cmd,
            index: 0,
            active: None,
            started_at: None,
            last_cmd: initial_cmd,
        })
    }

    /// Validate configured segments and build the path.
    pub fn from_config(configs: &[SegmentConfig], initial_cmd: f64) -> Result<Self, PathError> {
        let plans = configs
            .iter()
            .enumerate()
            .map(|(i, c)| SegmentPlan::from_config(i, c))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(plans, initial_cmd)
    }

    /// Produce the command for elapsed time `now`.
    ///
    /// # Arguments
    /// * `now` - Elapsed time since `t0` [s]
    /// * `data` - Latest input record, used by threshold conditions
    pub fn get_cmd(&mut self, now: f64, data: &Record) -> Result<PathStep, PathError> {
        let started_at = *self.started_at.get_or_insert(now);
        loop {
            let segment = match self.active.take() {
                Some(segment) => segment,
                None => {
                    let Some(plan) = self.plans.get(self.index) else {
                        return Ok(PathStep::Exhausted);
                    };
                    let segment = plan.activate(now, self.last_cmd);
                    debug!(
                        "Path segment {} activated at {:.3}s from {:.4} ({})",
                        self.index,
                        now,
                        segment.start(),
                        plan.condition
                    );
                    segment
                }
            };

            match segment.get_cmd(now, started_at, data) {
                Ok(SegmentStep::Cmd(cmd)) => {
                    self.active = Some(segment);
                    self.last_cmd = cmd;
                    return Ok(PathStep::Cmd(cmd));
                }
                Ok(SegmentStep::Done) => {
                    debug!("Path segment {} ended at {:.3}s", self.index, now);
                    self.index += 1;
                }
                Err(e) => {
                    self.active = Some(segment);
                    return Err(e);
                }
            }
        }
    }

    /// Restart from the first segment and the initial command.
    pub fn reset(&mut self) {
        self.index = 0;
        self.active = None;
        self.started_at = None;
        self.last_cmd = self.initial_cmd;
    }

    /// Index of the segment that will produce the next command.
    pub fn segment_index(&self) -> usize {
        self.index
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Always `false`; a path is never built empty.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Whether every segment has ended.
    pub fn is_exhausted(&self) -> bool {
        self.index >= self.plans.len()
    }

    /// Elapsed time since `t0` at which the path started, once it has.
    pub fn started_at(&self) -> Option<f64> {
        self.started_at
    }

    /// Last command produced.
    pub fn last_cmd(&self) -> f64 {
        self.last_cmd
    }
}

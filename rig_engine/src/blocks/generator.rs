//! Path-driven command generator.
//!
//! Each iteration evaluates the [`Path`] at the elapsed time since `t0`,
//! against the latest values of the block's inputs, and sends
//! `{t(s), <cmd_label>}` on every output. An exhausted path ends the block,
//! or restarts it from its initial command when `repeat` is set.

use crate::block::{Block, BlockError, BlockIo, CycleContext};
use crate::path::{Path, PathStep};
use crate::pipeline::GeneratorConfig;
use rig_common::config::ConfigError;
use rig_common::record::Record;
use tracing::{debug, info, warn};

/// Command generator block.
#[derive(Debug)]
pub struct Generator {
    path: Path,
    cmd_label: String,
    repeat: bool,
    rounds: u64,
}

impl Generator {
    /// Generator sending `path` commands under `cmd_label`.
    pub fn new(path: Path, cmd_label: impl Into<String>) -> Self {
        Self {
            path,
            cmd_label: cmd_label.into(),
            repeat: false,
            rounds: 0,
        }
    }

    /// Restart the path each time it is exhausted.
    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Build from configuration.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` if a segment or condition is invalid.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, ConfigError> {
        let path = Path::from_config(&config.path, config.initial_cmd)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(Self::new(path, &config.cmd_label).repeating(config.repeat))
    }

    /// Completed passes over the path.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    fn next_cmd(&mut self, now: f64, data: &Record) -> Result<Option<f64>, BlockError> {
        match self.path.get_cmd(now, data)? {
            PathStep::Cmd(cmd) => return Ok(Some(cmd)),
            PathStep::Exhausted => self.rounds += 1,
        }
        if !self.repeat {
            return Ok(None);
        }
        debug!("Generator path restarted at {:.3}s (round {})", now, self.rounds);
        self.path.reset();
        match self.path.get_cmd(now, data)? {
            PathStep::Cmd(cmd) => Ok(Some(cmd)),
            PathStep::Exhausted => {
                warn!("Generator path ends as soon as it starts, cannot repeat it");
                Ok(None)
            }
        }
    }
}

impl Block for Generator {
    fn kind(&self) -> &'static str {
        "generator"
    }

    fn prepare(&mut self, io: &mut BlockIo) -> Result<(), BlockError> {
        if !io.has_outputs() {
            warn!("Generator of '{}' has no output link", self.cmd_label);
        }
        Ok(())
    }

    fn cycle(&mut self, io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        let data = io.get_last(ctx.cancel())?;
        let now = ctx.elapsed();
        match self.next_cmd(now, &data)? {
            Some(cmd) => {
                io.send(Record::stamped(now).with(self.cmd_label.as_str(), cmd))?;
                Ok(())
            }
            None => Err(BlockError::EndOfProcessing),
        }
    }

    fn finish(&mut self, _io: &mut BlockIo, _ctx: &CycleContext) {
        info!(
            "Generator of '{}' done: segment {}/{}, last command {}",
            self.cmd_label,
            self.path.segment_index().min(self.path.len()),
            self.path.len(),
            self.path.last_cmd()
        );
    }
}

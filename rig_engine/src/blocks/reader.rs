//! Logs every record received on any input.

use super::{drain_inputs, idle};
use crate::block::{Block, BlockError, BlockIo, CycleContext};
use rig_common::config::ConfigError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info};

/// Block logging its inputs at `info` level.
#[derive(Debug)]
pub struct Reader {
    name: String,
    received: Arc<AtomicU64>,
}

impl Reader {
    /// Reader identified by `name` in the log output.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records logged so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Counter of logged records, still readable once the block has been
    /// handed to the orchestrator.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.received)
    }

    fn log_pending(&mut self, io: &BlockIo) -> Result<usize, BlockError> {
        let name = &self.name;
        let handled = drain_inputs(io, |link, record| {
            let line = serde_json::to_string(&record).unwrap_or_else(|_| format!("{record:?}"));
            info!("{} got from '{}': {}", name, link, line);
            Ok(())
        })?;
        self.received.fetch_add(handled as u64, Ordering::Relaxed);
        Ok(handled)
    }
}

impl Block for Reader {
    fn kind(&self) -> &'static str {
        "reader"
    }

    fn prepare(&mut self, io: &mut BlockIo) -> Result<(), BlockError> {
        if !io.has_inputs() {
            return Err(ConfigError::ValidationError(format!(
                "reader '{}' has no input link",
                self.name
            ))
            .into());
        }
        Ok(())
    }

    fn cycle(&mut self, io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        if self.log_pending(io)? == 0 {
            idle(io, ctx)?;
        }
        Ok(())
    }

    fn finish(&mut self, io: &mut BlockIo, _ctx: &CycleContext) {
        if let Err(e) = self.log_pending(io) {
            error!("Reader '{}': final drain failed: {}", self.name, e);
        }
        info!("Reader '{}' logged {} records", self.name, self.received());
    }
}

//! JSON-lines recorder.
//!
//! Every record of every input is appended to the output file as one JSON
//! object per line, keys in record order. Records still queued when the run
//! stops are written by `finish()`.

use super::{drain_inputs, idle};
use crate::block::{Block, BlockError, BlockIo, CycleContext};
use rig_common::config::ConfigError;
use rig_common::record::Record;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Block writing its inputs to a file.
#[derive(Debug)]
pub struct Recorder {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl Recorder {
    /// Recorder writing to `path`. The file is created in `prepare()`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            written: 0,
        }
    }

    /// Records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn write_pending(&mut self, io: &BlockIo) -> Result<usize, BlockError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(0);
        };
        let handled = drain_inputs(io, |_, record| write_line(writer, &record))?;
        if handled > 0 {
            writer.flush()?;
        }
        self.written += handled as u64;
        Ok(handled)
    }
}

fn write_line(writer: &mut impl Write, record: &Record) -> Result<(), BlockError> {
    serde_json::to_writer(&mut *writer, record).map_err(std::io::Error::from)?;
    writer.write_all(b"\n")?;
    Ok(())
}

impl Block for Recorder {
    fn kind(&self) -> &'static str {
        "recorder"
    }

    fn prepare(&mut self, io: &mut BlockIo) -> Result<(), BlockError> {
        if !io.has_inputs() {
            return Err(ConfigError::ValidationError(format!(
                "recorder of '{}' has no input link",
                self.path.display()
            ))
            .into());
        }
        let file = File::create(&self.path)?;
        self.writer = Some(BufWriter::new(file));
        info!("Recording to {}", self.path.display());
        Ok(())
    }

    fn cycle(&mut self, io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        if self.write_pending(io)? == 0 {
            idle(io, ctx)?;
        }
        Ok(())
    }

    fn finish(&mut self, io: &mut BlockIo, _ctx: &CycleContext) {
        if let Err(e) = self.write_pending(io) {
            error!("Recorder of '{}': final drain failed: {}", self.path.display(), e);
        }
        if self.writer.take().is_some() {
            info!(
                "Recorded {} records to {}",
                self.written,
                self.path.display()
            );
        }
    }
}

//! Built-in blocks.
//!
//! - [`generator`] - Runs a command path
//! - [`io_block`] - Drives a device
//! - [`reader`] - Logs incoming records
//! - [`recorder`] - Writes incoming records to a JSON-lines file

pub mod generator;
pub mod io_block;
pub mod reader;
pub mod recorder;

pub use generator::Generator;
pub use io_block::IoBlock;
pub use reader::Reader;
pub use recorder::Recorder;

use crate::block::{Block, BlockError, BlockIo, CycleContext};
use crate::pipeline::{BlockConfig, BlockKind};
use crate::registry::DeviceRegistry;
use rig_common::config::ConfigError;
use rig_common::consts::CANCEL_POLL_INTERVAL_MS;
use rig_common::device::DeviceError;
use rig_common::record::Record;
use std::time::Duration;

/// Instantiate the block declared by `config`.
///
/// # Errors
/// `ConfigError::ValidationError` for an invalid path or an unknown device.
pub fn build(
    config: &BlockConfig,
    devices: &DeviceRegistry,
) -> Result<Box<dyn Block>, ConfigError> {
    let block: Box<dyn Block> = match &config.kind {
        BlockKind::Generator(generator) => Box::new(Generator::from_config(generator)?),
        BlockKind::Io(io) => {
            let device = devices.create(&io.device).map_err(|e| match e {
                DeviceError::NotFound(name) => ConfigError::ValidationError(format!(
                    "block '{}': unknown device '{name}' (available: {})",
                    config.name,
                    devices.list().join(", ")
                )),
                other => ConfigError::ValidationError(other.to_string()),
            })?;
            Box::new(IoBlock::from_config(io, device)?)
        }
        BlockKind::Reader(_) => Box::new(Reader::new(&config.name)),
        BlockKind::Recorder(recorder) => Box::new(Recorder::new(&recorder.path)),
    };
    Ok(block)
}

/// Pass every unread record of every input to `handle`, oldest first.
///
/// Returns the number of records handled.
fn drain_inputs(
    io: &BlockIo,
    mut handle: impl FnMut(&str, Record) -> Result<(), BlockError>,
) -> Result<usize, BlockError> {
    let mut handled = 0;
    for input in &io.inputs {
        while let Some(record) = input.try_recv() {
            handle(input.name(), record)?;
            handled += 1;
        }
    }
    Ok(handled)
}

/// End of processing once every input is closed and drained, otherwise a
/// short cancellable sleep.
fn idle(io: &BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
    if io.inputs.iter().all(|i| i.is_closed() && !i.poll()) {
        return Err(BlockError::EndOfProcessing);
    }
    ctx.cancel().sleep(Duration::from_millis(CANCEL_POLL_INTERVAL_MS));
    Ok(())
}

//! Device-facing block.
//!
//! The block's mode follows its links: with outputs it reads the device and
//! sends one record per sample, with data inputs it forwards the latest
//! values of its `cmd_labels` to `set_cmd`. Both can be active at once.
//!
//! On `finish()` the stream is stopped, the exit values are written and only
//! then is the device closed, so an actuator is left in a known state even
//! when the run ends on an error elsewhere.

use crate::block::{Block, BlockError, BlockIo, CycleContext};
use crate::pipeline::IoConfig;
use rig_common::config::ConfigError;
use rig_common::device::{Device, DeviceError, DeviceSettings, Sample};
use rig_common::record::Record;
use tracing::{debug, error, info};

/// Device-facing block.
pub struct IoBlock {
    device: Box<dyn Device>,
    settings: DeviceSettings,
    labels: Vec<String>,
    cmd_labels: Vec<String>,
    streamer: bool,
    initial_cmd: Vec<f64>,
    exit_values: Option<Vec<f64>>,
    reads: bool,
    writes: bool,
    opened: bool,
    streaming: bool,
}

impl std::fmt::Debug for IoBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBlock")
            .field("device", &self.device.name())
            .field("labels", &self.labels)
            .field("cmd_labels", &self.cmd_labels)
            .field("streamer", &self.streamer)
            .field("opened", &self.opened)
            .finish()
    }
}

impl IoBlock {
    /// Block driving `device` with default labels and no exit values.
    pub fn new(device: Box<dyn Device>) -> Self {
        Self {
            device,
            settings: DeviceSettings::new(),
            labels: Vec::new(),
            cmd_labels: Vec::new(),
            streamer: false,
            initial_cmd: Vec::new(),
            exit_values: None,
            reads: false,
            writes: false,
            opened: false,
            streaming: false,
        }
    }

    /// Build from configuration around an already created device.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` if `initial_cmd` or `exit_values` do not
    /// match `cmd_labels`.
    pub fn from_config(config: &IoConfig, device: Box<dyn Device>) -> Result<Self, ConfigError> {
        let channels = config.cmd_labels.len();
        let initial_cmd = match &config.initial_cmd {
            Some(initial) => initial.expand(channels, "initial_cmd")?,
            None => vec![0.0; channels],
        };
        let exit_values = config
            .exit_values
            .as_ref()
            .map(|exit| exit.expand(channels, "exit_values"))
            .transpose()?;
        Ok(Self {
            settings: config.device_settings.clone(),
            labels: config.output_labels(),
            cmd_labels: config.cmd_labels.clone(),
            streamer: config.streamer,
            initial_cmd,
            exit_values,
            ..Self::new(device)
        })
    }

    fn read(&mut self, io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        let sample = if self.streamer {
            if !self.streaming {
                self.device.start_stream()?;
                self.streaming = true;
            }
            self.device.get_stream()?
        } else {
            self.device.get_data()?
        };
        io.send(self.to_record(sample, ctx)?)?;
        Ok(())
    }

    fn to_record(&self, sample: Sample, ctx: &CycleContext) -> Result<Record, BlockError> {
        let data_labels = self.labels.get(1..).unwrap_or_default();
        if sample.values.len() != data_labels.len() {
            return Err(BlockError::Device(DeviceError::Communication(format!(
                "{} returned {} values for labels {:?}",
                self.device.name(),
                sample.values.len(),
                data_labels
            ))));
        }
        let mut record = Record::stamped(ctx.since_t0(sample.at));
        for (label, value) in data_labels.iter().zip(sample.values) {
            record.insert(label.as_str(), value);
        }
        Ok(record)
    }

    fn write(&mut self, io: &BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        let data = io.get_last(ctx.cancel())?;
        let cmd = self
            .cmd_labels
            .iter()
            .map(|label| {
                data.scalar(label)
                    .ok_or_else(|| BlockError::MissingLabel(label.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.device.set_cmd(&cmd)?;
        Ok(())
    }
}

impl Block for IoBlock {
    fn kind(&self) -> &'static str {
        "io"
    }

    fn prepare(&mut self, io: &mut BlockIo) -> Result<(), BlockError> {
        self.reads = io.has_outputs();
        self.writes = io.has_inputs();
        if !self.reads && !self.writes {
            return Err(ConfigError::ValidationError(format!(
                "io block on '{}' is neither an input nor an output",
                self.device.name()
            ))
            .into());
        }
        if self.writes && self.cmd_labels.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "io block on '{}' has inputs but no cmd_labels",
                self.device.name()
            ))
            .into());
        }

        self.device.open(&self.settings)?;
        self.opened = true;
        info!(
            "Device '{}' opened (read: {}, write: {})",
            self.device.name(),
            self.reads,
            self.writes
        );

        if self.writes {
            self.device.set_cmd(&self.initial_cmd)?;
            debug!("Device '{}' initial command {:?}", self.device.name(), self.initial_cmd);
        }
        Ok(())
    }

    fn cycle(&mut self, io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        if self.reads {
            self.read(io, ctx)?;
        }
        if self.writes {
            self.write(io, ctx)?;
        }
        Ok(())
    }

    fn finish(&mut self, _io: &mut BlockIo, _ctx: &CycleContext) {
        if !self.opened {
            return;
        }
        let name = self.device.name();
        if self.streaming {
            if let Err(e) = self.device.stop_stream() {
                error!("Device '{}': stop_stream failed: {}", name, e);
            }
            self.streaming = false;
        }
        if let Some(exit) = &self.exit_values {
            match self.device.set_cmd(exit) {
                Ok(()) => info!("Device '{}' set to exit values {:?}", name, exit),
                Err(e) => error!("Device '{}': exit values not applied: {}", name, e),
            }
        }
        if let Err(e) = self.device.close() {
            error!("Device '{}': close failed: {}", name, e);
        }
        self.opened = false;
    }
}

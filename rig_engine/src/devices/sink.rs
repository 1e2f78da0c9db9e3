//! In-memory loopback device.
//!
//! Every command written with `set_cmd` is kept. `get_data` reads back the
//! last command, and in streaming mode `get_stream` returns the first
//! channel of every command received since the previous chunk.

use rig_common::device::{Device, DeviceError, DeviceSettings, Sample, parse_settings};
use rig_common::record::Value;
use serde::Deserialize;
use tracing::debug;

/// Registry name.
pub const NAME: &str = "sink";

/// Factory function to create a sink instance.
pub fn create_device() -> Box<dyn Device> {
    Box::new(Sink::new())
}

/// Sink parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkSettings {
    /// Channels returned by `get_data` before any command arrived.
    pub channels: usize,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self { channels: 1 }
    }
}

/// Loopback device keeping every command in memory.
#[derive(Debug, Default)]
pub struct Sink {
    settings: SinkSettings,
    open: bool,
    streaming: bool,
    commands: Vec<Vec<f64>>,
    stream_cursor: usize,
}

impl Sink {
    /// Closed sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command received since `open`.
    pub fn commands(&self) -> &[Vec<f64>] {
        &self.commands
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open {
            Ok(())
        } else {
            Err(DeviceError::NotOpen)
        }
    }
}

impl Device for Sink {
    fn name(&self) -> &'static str {
        NAME
    }

    fn open(&mut self, settings: &DeviceSettings) -> Result<(), DeviceError> {
        self.settings = parse_settings(NAME, settings)?;
        self.open = true;
        self.streaming = false;
        self.commands.clear();
        self.stream_cursor = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.open {
            debug!("{} closed after {} commands", NAME, self.commands.len());
        }
        self.open = false;
        self.streaming = false;
        Ok(())
    }

    fn get_data(&mut self) -> Result<Sample, DeviceError> {
        self.ensure_open()?;
        let values = match self.commands.last() {
            Some(last) => last.iter().copied().map(Value::Scalar).collect(),
            None => vec![Value::Scalar(0.0); self.settings.channels],
        };
        Ok(Sample::now(values))
    }

    fn get_stream(&mut self) -> Result<Sample, DeviceError> {
        self.ensure_open()?;
        if !self.streaming {
            return Err(DeviceError::Communication(format!(
                "{NAME}: stream not started"
            )));
        }
        let chunk: Vec<f64> = self.commands[self.stream_cursor..]
            .iter()
            .filter_map(|cmd| cmd.first().copied())
            .collect();
        self.stream_cursor = self.commands.len();
        Ok(Sample::now(vec![Value::Sequence(chunk)]))
    }

    fn set_cmd(&mut self, cmd: &[f64]) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.commands.push(cmd.to_vec());
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.streaming = true;
        self.stream_cursor = self.commands.len();
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), DeviceError> {
        self.streaming = false;
        Ok(())
    }
}

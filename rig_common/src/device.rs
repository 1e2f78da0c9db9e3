//! Device capability trait and error types.
//!
//! This module defines:
//! - `Device` trait - Interface implemented by hardware collaborators
//! - `DeviceError` enum - Error types for device operations
//! - `DeviceFactory` type alias - Factory function type
//! - `Sample` struct - One timestamped acquisition
//!
//! Concrete drivers (serial motor protocols, camera SDKs, DAQ boards) live
//! outside this workspace; they only have to implement [`Device`].

use crate::record::Value;
use serde::de::DeserializeOwned;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Error types for device operations.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// No device registered under the requested name.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Device settings are missing or invalid.
    #[error("Invalid device settings: {0}")]
    InvalidSettings(String),

    /// Hardware could not be opened.
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    /// Hardware communication failed while open.
    #[error("Device communication error: {0}")]
    Communication(String),

    /// An operation was requested on a device that is not open.
    #[error("Device is not open")]
    NotOpen,

    /// The device does not implement the requested capability.
    #[error("Device does not support {0}")]
    Unsupported(&'static str),
}

/// Opaque device settings, forwarded verbatim from the pipeline configuration.
pub type DeviceSettings = toml::Table;

/// Factory function type for creating device instances.
pub type DeviceFactory = fn() -> Box<dyn Device>;

/// One acquisition returned by a device.
///
/// `values` are positional; the owning block maps them onto its configured
/// labels and converts `at` into elapsed time since `t0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Instant the acquisition was taken.
    pub at: Instant,
    /// Acquired values, one per configured non-time label.
    pub values: Vec<Value>,
}

impl Sample {
    /// Sample taken now.
    pub fn now(values: Vec<Value>) -> Self {
        Self {
            at: Instant::now(),
            values,
        }
    }
}

/// Deserialize typed settings out of the opaque table.
///
/// # Errors
/// Returns `DeviceError::InvalidSettings` if the table does not match `T`.
pub fn parse_settings<T: DeserializeOwned>(
    device: &str,
    settings: &DeviceSettings,
) -> Result<T, DeviceError> {
    debug!("Parsing {} settings: {:?}", device, settings);
    toml::Value::Table(settings.clone())
        .try_into()
        .map_err(|e| DeviceError::InvalidSettings(format!("{device}: {e}")))
}

/// Capability contract consumed by hardware-facing blocks.
///
/// # Lifecycle
///
/// 1. `open()` - Called once from the owning block's `prepare()`
/// 2. `get_data()` / `get_stream()` / `set_cmd()` - Called from the block loop
/// 3. `close()` - Called from `finish()`, after any exit values were written
///
/// Capabilities a device does not have keep the default implementation,
/// which reports `DeviceError::Unsupported`.
pub trait Device: Send {
    /// Returns the device's registry name.
    fn name(&self) -> &'static str;

    /// Open the hardware with the given settings.
    ///
    /// # Errors
    /// `DeviceError::InvalidSettings` for bad settings,
    /// `DeviceError::Unavailable` if the hardware cannot be reached.
    fn open(&mut self, settings: &DeviceSettings) -> Result<(), DeviceError>;

    /// Release the hardware. Must be idempotent.
    fn close(&mut self) -> Result<(), DeviceError>;

    /// Read one sample.
    fn get_data(&mut self) -> Result<Sample, DeviceError> {
        Err(DeviceError::Unsupported("get_data"))
    }

    /// Read one bulk chunk in streaming mode.
    fn get_stream(&mut self) -> Result<Sample, DeviceError> {
        Err(DeviceError::Unsupported("get_stream"))
    }

    /// Apply one command value per configured command label.
    fn set_cmd(&mut self, _cmd: &[f64]) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("set_cmd"))
    }

    /// Enter streaming mode.
    fn start_stream(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Leave streaming mode.
    fn stop_stream(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

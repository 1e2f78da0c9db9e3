//! Prelude module for common re-exports.
//!
//! ```rust
//! use rig_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_LINK_CAPACITY, TIME_LABEL};

// ─── Devices ────────────────────────────────────────────────────────
pub use crate::device::{Device, DeviceError, DeviceFactory, DeviceSettings, Sample};

// ─── Records ────────────────────────────────────────────────────────
pub use crate::record::{Record, Value};

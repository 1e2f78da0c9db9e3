//! Built-in simulated devices.
//!
//! - [`fake_motor`] - First-order DC motor model
//! - [`sink`] - In-memory loopback sink
//!
//! # Adding New Devices
//!
//! 1. Create a new submodule under `devices/`
//! 2. Implement the `Device` trait from `rig_common::device`
//! 3. Register its factory in [`register_builtins`]

pub mod fake_motor;
pub mod sink;

pub use fake_motor::FakeMotor;
pub use sink::Sink;

use crate::registry::DeviceRegistry;

/// Register every built-in device.
pub fn register_builtins(registry: &mut DeviceRegistry) {
    registry.register(fake_motor::NAME, fake_motor::create_device);
    registry.register(sink::NAME, sink::create_device);
}

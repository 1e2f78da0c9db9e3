//! Device registry.
//!
//! Maps a device name from the pipeline configuration to a factory producing
//! a fresh `Box<dyn Device>`. The process-wide [`builtin`] registry is
//! populated once on first use and never mutated afterwards; tests and
//! embedders build their own [`DeviceRegistry`] and inject it into the
//! orchestrator instead.

use rig_common::device::{Device, DeviceError, DeviceFactory};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Registry of available device factories.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    factories: HashMap<&'static str, DeviceFactory>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every built-in device.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::devices::register_builtins(&mut registry);
        registry
    }

    /// Register a device factory.
    ///
    /// # Panics
    /// Panics if a device with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: DeviceFactory) {
        if self.factories.contains_key(name) {
            panic!("Device '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a device factory by name.
    pub fn get_factory(&self, name: &str) -> Option<DeviceFactory> {
        self.factories.get(name).copied()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Create a device instance by name.
    ///
    /// # Errors
    /// Returns `DeviceError::NotFound` if no device with the given name is registered.
    pub fn create(&self, name: &str) -> Result<Box<dyn Device>, DeviceError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))?;
        Ok(factory())
    }

    /// List all registered device names, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

static BUILTIN: LazyLock<DeviceRegistry> = LazyLock::new(DeviceRegistry::with_builtins);

/// Process-wide registry of built-in devices.
pub fn builtin() -> &'static DeviceRegistry {
    &BUILTIN
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_common::device::DeviceSettings;

    struct NullDevice;

    impl Device for NullDevice {
        fn name(&self) -> &'static str {
            "null"
        }

        fn open(&mut self, _settings: &DeviceSettings) -> Result<(), DeviceError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn create_null() -> Box<dyn Device> {
        Box::new(NullDevice)
    }

    #[test]
    fn register_and_create() {
        let mut reg = DeviceRegistry::new();
        reg.register("null", create_null);
        assert!(reg.contains("null"));
        let device = reg.create("null").expect("should create");
        assert_eq!(device.name(), "null");
    }

    #[test]
    fn unknown_device_is_not_found() {
        let reg = DeviceRegistry::new();
        assert!(matches!(reg.create("ghost"), Err(DeviceError::NotFound(_))));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut reg = DeviceRegistry::new();
        reg.register("null", create_null);
        reg.register("null", create_null);
    }

    #[test]
    fn builtin_registry_has_simulated_devices() {
        let names = builtin().list();
        assert!(names.contains(&"fake_motor"));
        assert!(names.contains(&"sink"));
        // Same instance on every call.
        assert!(std::ptr::eq(builtin(), builtin()));
    }
}

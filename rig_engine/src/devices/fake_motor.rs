//! Simulated DC motor.
//!
//! The model integrates the speed under a constant voltage between two
//! calls:
//!
//! ```text
//! F     = u·kv − torque − rpm·(1 + rv + rpm·fv)
//! Δrpm  = F / inertia · dt
//! pos  += dt · (rpm + Δrpm / 2)
//! ```
//!
//! `set_cmd([u])` sets the voltage, `get_data()` returns `[rpm, position]`.

use rig_common::device::{Device, DeviceError, DeviceSettings, Sample, parse_settings};
use rig_common::record::Value;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, trace};

/// Registry name.
pub const NAME: &str = "fake_motor";

/// Factory function to create a fake motor instance.
pub fn create_device() -> Box<dyn Device> {
    Box::new(FakeMotor::new())
}

/// Motor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FakeMotorSettings {
    /// Rotor inertia.
    pub inertia: f64,
    /// Counter torque on the axis.
    pub torque: f64,
    /// Speed constant [rpm/V].
    pub kv: f64,
    /// Solid friction.
    pub rv: f64,
    /// Fluid friction.
    pub fv: f64,
}

impl Default for FakeMotorSettings {
    fn default() -> Self {
        Self {
            inertia: 0.5,
            torque: 0.0,
            kv: 1000.0,
            rv: 0.4,
            fv: 2e-5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MotorState {
    rpm: f64,
    pos: f64,
    volts: f64,
    updated: Instant,
}

/// Simulated DC motor.
#[derive(Debug, Default)]
pub struct FakeMotor {
    settings: FakeMotorSettings,
    state: Option<MotorState>,
}

impl FakeMotor {
    /// Closed motor with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current speed [rpm], without integrating.
    pub fn rpm(&self) -> Option<f64> {
        self.state.map(|s| s.rpm)
    }

    /// Integrate the model over `dt` seconds at the current voltage.
    pub fn advance(&mut self, dt: f64) -> Result<(), DeviceError> {
        let p = self.settings;
        let state = self.state.as_mut().ok_or(DeviceError::NotOpen)?;
        let force = state.volts * p.kv - p.torque - state.rpm * (1.0 + p.rv + state.rpm * p.fv);
        let drpm = force / p.inertia * dt;
        state.pos += dt * (state.rpm + drpm / 2.0);
        state.rpm += drpm;
        Ok(())
    }

    fn update(&mut self) -> Result<(), DeviceError> {
        let state = self.state.as_mut().ok_or(DeviceError::NotOpen)?;
        let now = Instant::now();
        let dt = now.saturating_duration_since(state.updated).as_secs_f64();
        state.updated = now;
        self.advance(dt)
    }
}

impl Device for FakeMotor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn open(&mut self, settings: &DeviceSettings) -> Result<(), DeviceError> {
        let settings: FakeMotorSettings = parse_settings(NAME, settings)?;
        if !(settings.inertia.is_finite() && settings.inertia > 0.0) {
            return Err(DeviceError::InvalidSettings(format!(
                "{NAME}: inertia must be positive, got {}",
                settings.inertia
            )));
        }
        self.settings = settings;
        self.state = Some(MotorState {
            rpm: 0.0,
            pos: 0.0,
            volts: 0.0,
            updated: Instant::now(),
        });
        debug!("{} opened: {:?}", NAME, settings);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.state.take().is_some() {
            debug!("{} closed", NAME);
        }
        Ok(())
    }

    fn get_data(&mut self) -> Result<Sample, DeviceError> {
        self.update()?;
        let state = self.state.as_ref().ok_or(DeviceError::NotOpen)?;
        Ok(Sample::now(vec![
            Value::Scalar(state.rpm),
            Value::Scalar(state.pos),
        ]))
    }

    fn set_cmd(&mut self, cmd: &[f64]) -> Result<(), DeviceError> {
        let [volts] = cmd else {
            return Err(DeviceError::InvalidSettings(format!(
                "{NAME} takes one command (volts), got {}",
                cmd.len()
            )));
        };
        self.update()?;
        if let Some(state) = self.state.as_mut() {
            state.volts = *volts;
        }
        trace!("{} voltage set to {}", NAME, volts);
        Ok(())
    }
}

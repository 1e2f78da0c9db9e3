//! Command-generating segments.
//!
//! A [`SegmentPlan`] is the immutable description loaded from configuration.
//! Activating it at a given instant, with the previous segment's last command
//! as continuity value, yields a [`Segment`] whose command is a pure function
//! of the time since its activation. Its end condition is evaluated against
//! the time since the path started.

use super::PathError;
use super::condition::Condition;
use rig_common::record::Record;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Segment description as written in the pipeline configuration.
///
/// # TOML Example
///
/// ```toml
/// path = [
///   { type = "ramp", speed = 2.0, condition = "delay=3", cmd = 0.0 },
///   { type = "constant", condition = "F(N)>500" },
///   { type = "sine", amplitude = 1.0, freq = 0.5, condition = "delay=10" },
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SegmentConfig {
    /// Hold a value.
    Constant {
        /// Value to hold. Defaults to the previous command.
        #[serde(default)]
        value: Option<f64>,
        /// End condition.
        #[serde(default)]
        condition: Option<String>,
    },
    /// Linear ramp.
    Ramp {
        /// Slope [units/s].
        speed: f64,
        /// End condition.
        #[serde(default)]
        condition: Option<String>,
        /// Starting value. Defaults to the previous command.
        #[serde(default)]
        cmd: Option<f64>,
    },
    /// Sinusoid around `offset`.
    Sine {
        /// Peak amplitude.
        amplitude: f64,
        /// Frequency [Hz].
        freq: f64,
        /// Mean value.
        #[serde(default)]
        offset: f64,
        /// Phase at activation [rad].
        #[serde(default)]
        phase: f64,
        /// End condition.
        #[serde(default)]
        condition: Option<String>,
    },
}

/// Command law of a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Profile {
    /// Constant at the start value.
    Constant,
    /// `start + speed * t`.
    Ramp {
        /// Slope [units/s].
        speed: f64,
    },
    /// `offset + amplitude * sin(2π·freq·t + phase)`.
    Sine {
        /// Peak amplitude.
        amplitude: f64,
        /// Frequency [Hz].
        freq: f64,
        /// Mean value.
        offset: f64,
        /// Phase at activation [rad].
        phase: f64,
    },
}

/// Validated, immutable segment description.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    /// Command law.
    pub profile: Profile,
    /// Explicit start value overriding continuity.
    pub start_override: Option<f64>,
    /// End condition.
    pub condition: Condition,
}

impl SegmentPlan {
    /// Validate a configured segment.
    ///
    /// # Errors
    /// `PathError::InvalidSegment` for non-finite parameters or a negative
    /// frequency, `PathError::InvalidCondition` for a malformed condition.
    pub fn from_config(index: usize, config: &SegmentConfig) -> Result<Self, PathError> {
        let invalid = |reason: &str| PathError::InvalidSegment {
            index,
            reason: reason.to_string(),
        };
        let finite = |name: &str, v: f64| {
            if v.is_finite() {
                Ok(v)
            } else {
                Err(invalid(&format!("{name} must be finite")))
            }
        };

        let (profile, start_override, condition) = match config {
            SegmentConfig::Constant { value, condition } => {
                if let Some(v) = value {
                    finite("value", *v)?;
                }
                (Profile::Constant, *value, condition)
            }
            SegmentConfig::Ramp {
                speed,
                condition,
                cmd,
            } => {
                finite("speed", *speed)?;
                if let Some(v) = cmd {
                    finite("cmd", *v)?;
                }
                (Profile::Ramp { speed: *speed }, *cmd, condition)
            }
            SegmentConfig::Sine {
                amplitude,
                freq,
                offset,
                phase,
                condition,
            } => {
                finite("amplitude", *amplitude)?;
                finite("offset", *offset)?;
                finite("phase", *phase)?;
                if !(freq.is_finite() && *freq >= 0.0) {
                    return Err(invalid("freq must be a finite, non-negative number"));
                }
                (
                    Profile::Sine {
                        amplitude: *amplitude,
                        freq: *freq,
                        offset: *offset,
                        phase: *phase,
                    },
                    None,
                    condition,
                )
            }
        };

        Ok(Self {
            profile,
            start_override,
            condition: Condition::parse(condition.as_deref())?,
        })
    }

    /// Activate the plan.
    ///
    /// # Arguments
    /// * `now` - Elapsed time since `t0` at activation [s]
    /// * `previous_cmd` - Last command of the previous segment
    pub fn activate(&self, now: f64, previous_cmd: f64) -> Segment {
        Segment {
            activated_at: now,
            start: self.start_override.unwrap_or(previous_cmd),
            profile: self.profile,
            condition: self.condition.clone(),
        }
    }
}

/// Result of evaluating a segment once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentStep {
    /// Command for this iteration.
    Cmd(f64),
    /// End condition met; no command produced.
    Done,
}

/// An activated segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    activated_at: f64,
    start: f64,
    profile: Profile,
    condition: Condition,
}

impl Segment {
    /// Elapsed time since `t0` at which the segment was activated [s].
    pub fn activated_at(&self) -> f64 {
        self.activated_at
    }

    /// Start value after continuity/override resolution.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Command law evaluated at `now`, ignoring the end condition.
    pub fn command_at(&self, now: f64) -> f64 {
        let t = now - self.activated_at;
        match self.profile {
            Profile::Constant => self.start,
            Profile::Ramp { speed } => self.start + speed * t,
            Profile::Sine {
                amplitude,
                freq,
                offset,
                phase,
            } => offset + amplitude * (TAU * freq * t + phase).sin(),
        }
    }

    /// Check the end condition, then produce the command.
    ///
    /// # Arguments
    /// * `now` - Elapsed time since `t0` [s]
    /// * `path_started_at` - Elapsed time since `t0` at which the path started [s]
    /// * `data` - Latest input record
    pub fn get_cmd(
        &self,
        now: f64,
        path_started_at: f64,
        data: &Record,
    ) -> Result<SegmentStep, PathError> {
        if self.condition.is_met(now - path_started_at, data)? {
            return Ok(SegmentStep::Done);
        }
        Ok(SegmentStep::Cmd(self.command_at(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(speed: f64, condition: &str, cmd: Option<f64>) -> SegmentPlan {
        SegmentPlan::from_config(
            0,
            &SegmentConfig::Ramp {
                speed,
                condition: Some(condition.to_string()),
                cmd,
            },
        )
        .unwrap()
    }

    #[test]
    fn ramp_follows_elapsed_time_until_delay() {
        let seg = ramp(2.0, "delay=3", Some(0.0)).activate(0.0, 0.0);
        let empty = Record::new();
        for now in [0.0, 0.5, 1.0, 2.0, 2.99] {
            match seg.get_cmd(now, 0.0, &empty).unwrap() {
                SegmentStep::Cmd(v) => assert!((v - 2.0 * now).abs() < 1e-9),
                SegmentStep::Done => panic!("ramp ended early at {now}"),
            }
        }
        assert_eq!(seg.get_cmd(3.0, 0.0, &empty).unwrap(), SegmentStep::Done);
        assert_eq!(seg.get_cmd(4.0, 0.0, &empty).unwrap(), SegmentStep::Done);
    }

    #[test]
    fn ramp_law_is_relative_to_activation_delay_to_path_start() {
        // Path started at 8 s, segment activated at 10 s.
        let seg = ramp(1.0, "delay=3", None).activate(10.0, 5.0);
        assert_eq!(seg.start(), 5.0);
        let empty = Record::new();
        assert_eq!(seg.get_cmd(10.5, 8.0, &empty).unwrap(), SegmentStep::Cmd(5.5));
        assert_eq!(seg.get_cmd(11.0, 8.0, &empty).unwrap(), SegmentStep::Done);
    }

    #[test]
    fn explicit_start_overrides_continuity() {
        let seg = ramp(1.0, "delay=2", Some(-3.0)).activate(0.0, 5.0);
        assert_eq!(seg.start(), -3.0);
    }

    #[test]
    fn constant_holds_previous_command_by_default() {
        let plan = SegmentPlan::from_config(
            0,
            &SegmentConfig::Constant {
                value: None,
                condition: None,
            },
        )
        .unwrap();
        let seg = plan.activate(1.0, 4.2);
        assert_eq!(seg.command_at(1.0), 4.2);
        assert_eq!(seg.command_at(100.0), 4.2);
    }

    #[test]
    fn sine_starts_at_offset_plus_phase() {
        let plan = SegmentPlan::from_config(
            0,
            &SegmentConfig::Sine {
                amplitude: 2.0,
                freq: 1.0,
                offset: 1.0,
                phase: 0.0,
                condition: None,
            },
        )
        .unwrap();
        let seg = plan.activate(0.0, 123.0);
        assert!((seg.command_at(0.0) - 1.0).abs() < 1e-12);
        assert!((seg.command_at(0.25) - 3.0).abs() < 1e-9);
        assert!((seg.command_at(0.75) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn threshold_end_condition_uses_input_data() {
        let plan = SegmentPlan::from_config(
            0,
            &SegmentConfig::Constant {
                value: Some(1.0),
                condition: Some("F(N)>100".to_string()),
            },
        )
        .unwrap();
        let seg = plan.activate(0.0, 0.0);
        let low = Record::stamped(0.1).with("F(N)", 50.0);
        let high = Record::stamped(0.2).with("F(N)", 150.0);
        assert_eq!(seg.get_cmd(0.1, 0.0, &low).unwrap(), SegmentStep::Cmd(1.0));
        assert_eq!(seg.get_cmd(0.2, 0.0, &high).unwrap(), SegmentStep::Done);
        assert!(matches!(
            seg.get_cmd(0.3, 0.0, &Record::new()),
            Err(PathError::MissingLabel(_))
        ));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let bad = SegmentConfig::Sine {
            amplitude: 1.0,
            freq: -1.0,
            offset: 0.0,
            phase: 0.0,
            condition: None,
        };
        assert!(matches!(
            SegmentPlan::from_config(2, &bad),
            Err(PathError::InvalidSegment { index: 2, .. })
        ));

        let bad = SegmentConfig::Ramp {
            speed: f64::INFINITY,
            condition: None,
            cmd: None,
        };
        assert!(SegmentPlan::from_config(0, &bad).is_err());
    }

    #[test]
    fn segment_config_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            path: Vec<SegmentConfig>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"path = [
                { type = "ramp", speed = 2.0, condition = "delay=3", cmd = 0.0 },
                { type = "constant", condition = "x>5" },
                { type = "sine", amplitude = 1.0, freq = 0.5 },
            ]"#,
        )
        .unwrap();
        assert_eq!(parsed.path.len(), 3);
        assert_eq!(
            parsed.path[0],
            SegmentConfig::Ramp {
                speed: 2.0,
                condition: Some("delay=3".to_string()),
                cmd: Some(0.0),
            }
        );
        assert!(matches!(
            parsed.path[2],
            SegmentConfig::Sine { offset, phase, .. } if offset == 0.0 && phase == 0.0
        ));
    }
}

//! End conditions of path segments.
//!
//! Condition strings are parsed once, when the path is built, into a
//! [`Condition`] and then evaluated by a pure function against the latest
//! input record and the time elapsed since the path started. Every segment
//! of a path shares that origin, so `delay=5` on the second segment ends it
//! 5 s into the path, not 5 s after the segment began.
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `label<value` | any scalar under `label` is strictly below `value` |
//! | `label>value` | any scalar under `label` is strictly above `value` |
//! | `delay=value` | `value` seconds elapsed since the path started (spaces around `=` allowed) |
//! | empty / absent | never met |
//! | anything else | met immediately |

use super::PathError;
use rig_common::record::Record;
use std::fmt;
use std::str::FromStr;

/// Threshold direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `label<value`
    Less,
    /// `label>value`
    Greater,
}

impl Comparator {
    #[inline]
    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Less => lhs < rhs,
            Self::Greater => lhs > rhs,
        }
    }

    const fn symbol(self) -> char {
        match self {
            Self::Less => '<',
            Self::Greater => '>',
        }
    }
}

/// Parsed segment end condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Compare every scalar under `label` with `value`.
    Threshold {
        /// Record label to inspect.
        label: String,
        /// Comparison direction.
        comparator: Comparator,
        /// Threshold.
        value: f64,
    },
    /// Met once `seconds` elapsed since the path started.
    Delay {
        /// Path time at which the condition fires [s].
        seconds: f64,
    },
    /// Never met; the segment runs until the run is stopped.
    Never,
    /// Met on first evaluation.
    Always,
}

impl Condition {
    /// Parse an optional condition string.
    ///
    /// `None` and blank strings give [`Condition::Never`].
    pub fn parse(text: Option<&str>) -> Result<Self, PathError> {
        match text {
            None => Ok(Self::Never),
            Some(text) => text.parse(),
        }
    }

    /// Evaluate the condition.
    ///
    /// # Arguments
    /// * `since_path_start` - Seconds elapsed since the path started
    /// * `data` - Latest merged input record
    ///
    /// # Errors
    /// `PathError::MissingLabel` if a threshold label is absent from `data`,
    /// `PathError::NotComparable` if it holds a buffer.
    pub fn is_met(&self, since_path_start: f64, data: &Record) -> Result<bool, PathError> {
        match self {
            Self::Threshold {
                label,
                comparator,
                value,
            } => {
                let stored = data
                    .get(label)
                    .ok_or_else(|| PathError::MissingLabel(label.clone()))?;
                let scalars = stored
                    .scalars()
                    .ok_or_else(|| PathError::NotComparable(label.clone()))?;
                Ok(scalars.iter().any(|&s| comparator.holds(s, *value)))
            }
            Self::Delay { seconds } => Ok(since_path_start >= *seconds),
            Self::Never => Ok(false),
            Self::Always => Ok(true),
        }
    }
}

impl FromStr for Condition {
    type Err = PathError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::Never);
        }

        let invalid = |reason: &str| PathError::InvalidCondition {
            condition: text.to_string(),
            reason: reason.to_string(),
        };

        let threshold = [Comparator::Less, Comparator::Greater]
            .into_iter()
            .find_map(|c| trimmed.split_once(c.symbol()).map(|(l, v)| (c, l, v)));

        if let Some((comparator, label, value)) = threshold {
            let label = label.trim();
            if label.is_empty() {
                return Err(invalid("missing label"));
            }
            let value = parse_number(value).ok_or_else(|| invalid("threshold is not a number"))?;
            return Ok(Self::Threshold {
                label: label.to_string(),
                comparator,
                value,
            });
        }

        if let Some(rest) = trimmed.strip_prefix("delay") {
            let value = rest
                .trim_start()
                .strip_prefix('=')
                .ok_or_else(|| invalid("expected 'delay=<seconds>'"))?;
            let seconds = parse_number(value).ok_or_else(|| invalid("delay is not a number"))?;
            if seconds < 0.0 {
                return Err(invalid("delay must not be negative"));
            }
            return Ok(Self::Delay { seconds });
        }

        Ok(Self::Always)
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threshold {
                label,
                comparator,
                value,
            } => write!(f, "{label}{}{value}", comparator.symbol()),
            Self::Delay { seconds } => write!(f, "delay={seconds}"),
            Self::Never => write!(f, "never"),
            Self::Always => write!(f, "always"),
        }
    }
}

//! Pipeline configuration.
//!
//! A pipeline file declares blocks and the links between them. Framework
//! fields (scheduling, trigger, end-of-processing policy) are typed here;
//! each block kind adds its own flattened fields, and device settings are an
//! opaque table forwarded verbatim to the device.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! name = "motor-bench"
//!
//! [[blocks]]
//! name = "gen"
//! kind = "generator"
//! freq = 100
//! cmd_label = "cmd"
//! path = [{ type = "ramp", speed = 1.0, condition = "delay=2", cmd = 0.0 }]
//!
//! [[blocks]]
//! name = "motor"
//! kind = "io"
//! freq = 100
//! device = "fake_motor"
//! labels = ["t(s)", "rpm", "pos"]
//! cmd_labels = ["cmd"]
//! exit_values = 0.0
//! device_settings = { kv = 1000.0 }
//!
//! [[links]]
//! from = "gen"
//! to = ["motor"]
//! ```

use crate::path::SegmentConfig;
use crate::runner::{OnExhausted, Schedule};
use rig_common::config::{ConfigError, SharedConfig};
use rig_common::consts::{DEFAULT_LINK_CAPACITY, MAX_LINK_CAPACITY, TIME_LABEL};
use rig_common::device::DeviceSettings;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Root of a pipeline file.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Common settings.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Blocks, in spawn order.
    #[serde(default)]
    pub blocks: Vec<BlockConfig>,
    /// Links between blocks.
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

/// One block declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockConfig {
    /// Unique block name.
    pub name: String,
    /// Target loop frequency [Hz]. Absent runs free.
    #[serde(default)]
    pub freq: Option<f64>,
    /// Niceness of the block thread.
    #[serde(default)]
    pub niceness: Option<i32>,
    /// CPU core the block thread is pinned to.
    #[serde(default)]
    pub cpu_core: Option<usize>,
    /// Name of a link feeding this block, used only to gate iterations.
    #[serde(default)]
    pub trigger: Option<String>,
    /// End-of-processing policy. Defaults to `cascade` for generators,
    /// `stop` otherwise.
    #[serde(default)]
    pub on_exhausted: Option<OnExhausted>,
    /// Kind-specific fields. Keys unknown to the kind are rejected.
    #[serde(flatten)]
    pub kind: BlockKind,
}

/// Kind-specific block fields, selected by the `kind` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BlockKind {
    /// Path-driven command generator.
    Generator(GeneratorConfig),
    /// Device reader and/or writer.
    Io(IoConfig),
    /// Logs incoming records.
    Reader(ReaderConfig),
    /// Writes incoming records to a file.
    Recorder(RecorderConfig),
}

impl BlockKind {
    /// Kind identifier as written in the configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generator(_) => "generator",
            Self::Io(_) => "io",
            Self::Reader(_) => "reader",
            Self::Recorder(_) => "recorder",
        }
    }
}

fn default_cmd_label() -> String {
    "cmd".to_string()
}

/// Generator fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Segments, run in order.
    pub path: Vec<SegmentConfig>,
    /// Label carrying the command.
    #[serde(default = "default_cmd_label")]
    pub cmd_label: String,
    /// Continuity value of the first segment.
    #[serde(default)]
    pub initial_cmd: f64,
    /// Restart the path when it is exhausted instead of stopping.
    #[serde(default)]
    pub repeat: bool,
}

/// A value given either once for every channel or once per channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PerChannel {
    /// Same value on every channel.
    All(f64),
    /// One value per channel.
    Each(Vec<f64>),
}

impl PerChannel {
    /// Values for `channels` channels.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` if a list does not have one value per channel.
    pub fn expand(&self, channels: usize, what: &str) -> Result<Vec<f64>, ConfigError> {
        match self {
            Self::All(v) => Ok(vec![*v; channels]),
            Self::Each(values) if values.len() == channels => Ok(values.clone()),
            Self::Each(values) => Err(ConfigError::ValidationError(format!(
                "{what} has {} values for {channels} command labels",
                values.len()
            ))),
        }
    }
}

/// IO block fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoConfig {
    /// Registry name of the device.
    pub device: String,
    /// Output labels, time label first.
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    /// Input labels forwarded to `set_cmd`, in order.
    #[serde(default)]
    pub cmd_labels: Vec<String>,
    /// Read with `get_stream` instead of `get_data`.
    #[serde(default)]
    pub streamer: bool,
    /// Command written right after opening the device. Defaults to 0.
    #[serde(default)]
    pub initial_cmd: Option<PerChannel>,
    /// Command written in `finish()`, before the device is closed.
    #[serde(default)]
    pub exit_values: Option<PerChannel>,
    /// Opaque settings forwarded to `Device::open`.
    #[serde(default)]
    pub device_settings: DeviceSettings,
}

impl IoConfig {
    /// Output labels, defaulting to `[t(s), "1"]` or `[t(s), "stream"]`.
    pub fn output_labels(&self) -> Vec<String> {
        match &self.labels {
            Some(labels) => labels.clone(),
            None if self.streamer => vec![TIME_LABEL.to_string(), "stream".to_string()],
            None => vec![TIME_LABEL.to_string(), "1".to_string()],
        }
    }
}

/// Reader fields. The reader takes none.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {}

/// Recorder fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecorderConfig {
    /// Output file, one JSON object per line.
    pub path: PathBuf,
}

/// Link destinations, written as one name or a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Destinations {
    One(String),
    Many(Vec<String>),
}

impl From<Destinations> for Vec<String> {
    fn from(d: Destinations) -> Self {
        match d {
            Destinations::One(name) => vec![name],
            Destinations::Many(names) => names,
        }
    }
}

fn destinations<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Destinations::deserialize(d).map(Into::into)
}

/// One link declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Link name. Defaults to `from->to1,to2`.
    #[serde(default)]
    pub name: Option<String>,
    /// Producer block.
    pub from: String,
    /// Consumer blocks.
    #[serde(deserialize_with = "destinations")]
    pub to: Vec<String>,
    /// Per-endpoint queue capacity.
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl LinkConfig {
    /// Effective link name.
    pub fn link_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.from, self.to.join(",")))
    }

    /// Effective per-endpoint capacity.
    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or(DEFAULT_LINK_CAPACITY)
    }
}

impl BlockConfig {
    /// Kind identifier.
    pub fn kind_name(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Effective end-of-processing policy.
    pub fn effective_on_exhausted(&self) -> OnExhausted {
        self.on_exhausted.unwrap_or(match self.kind {
            BlockKind::Generator(_) => OnExhausted::Cascade,
            _ => OnExhausted::Stop,
        })
    }

    /// Scheduling policy of the block.
    pub fn schedule(&self) -> Schedule {
        Schedule {
            freq: self.freq,
            niceness: self.niceness,
            cpu_core: self.cpu_core,
            trigger: self.trigger.clone(),
            on_exhausted: self.effective_on_exhausted(),
        }
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::ValidationError(msg)
}

impl PipelineConfig {
    /// Parse and validate a pipeline from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a block by name.
    pub fn block(&self, name: &str) -> Option<&BlockConfig> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Validate the graph and every block's framework fields.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.blocks.is_empty() {
            return Err(invalid("pipeline declares no block".into()));
        }

        let mut names = HashSet::new();
        for block in &self.blocks {
            if block.name.trim().is_empty() {
                return Err(invalid("block name cannot be empty".into()));
            }
            if !names.insert(block.name.as_str()) {
                return Err(invalid(format!("duplicate block name '{}'", block.name)));
            }
            if let Some(freq) = block.freq {
                if !(freq.is_finite() && freq > 0.0) {
                    return Err(invalid(format!(
                        "block '{}': freq must be positive, got {freq}",
                        block.name
                    )));
                }
            }
            self.validate_kind(block)?;
        }

        let mut link_names = HashSet::new();
        for link in &self.links {
            let name = link.link_name();
            if !link_names.insert(name.clone()) {
                return Err(invalid(format!("duplicate link name '{name}'")));
            }
            if !names.contains(link.from.as_str()) {
                return Err(invalid(format!(
                    "link '{name}': unknown producer block '{}'",
                    link.from
                )));
            }
            if link.to.is_empty() {
                return Err(invalid(format!("link '{name}' has no consumer")));
            }
            let mut consumers = HashSet::new();
            for to in &link.to {
                if !names.contains(to.as_str()) {
                    return Err(invalid(format!(
                        "link '{name}': unknown consumer block '{to}'"
                    )));
                }
                if *to == link.from {
                    return Err(invalid(format!("link '{name}' loops on block '{to}'")));
                }
                if !consumers.insert(to.as_str()) {
                    return Err(invalid(format!("link '{name}' lists '{to}' twice")));
                }
            }
            let capacity = link.effective_capacity();
            if capacity == 0 || capacity > MAX_LINK_CAPACITY {
                return Err(invalid(format!(
                    "link '{name}': capacity must be in 1..={MAX_LINK_CAPACITY}, got {capacity}"
                )));
            }
        }

        for block in &self.blocks {
            if let Some(trigger) = &block.trigger {
                let feeds_block = self
                    .links
                    .iter()
                    .any(|l| l.link_name() == *trigger && l.to.contains(&block.name));
                if !feeds_block {
                    return Err(invalid(format!(
                        "block '{}': trigger '{trigger}' is not a link feeding this block",
                        block.name
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_kind(&self, block: &BlockConfig) -> Result<(), ConfigError> {
        let name = &block.name;
        match &block.kind {
            BlockKind::Generator(generator) => {
                if generator.path.is_empty() {
                    return Err(invalid(format!("generator '{name}' has an empty path")));
                }
                if generator.cmd_label.is_empty() || generator.cmd_label == TIME_LABEL {
                    return Err(invalid(format!(
                        "generator '{name}': invalid cmd_label '{}'",
                        generator.cmd_label
                    )));
                }
            }
            BlockKind::Io(io) => {
                if io.device.is_empty() {
                    return Err(invalid(format!("io block '{name}' names no device")));
                }
                let labels = io.output_labels();
                if labels.first().map(String::as_str) != Some(TIME_LABEL) {
                    return Err(invalid(format!(
                        "io block '{name}': first label must be '{TIME_LABEL}'"
                    )));
                }
                let channels = io.cmd_labels.len();
                if let Some(exit) = &io.exit_values {
                    exit.expand(channels, &format!("io block '{name}' exit_values"))?;
                }
                if let Some(initial) = &io.initial_cmd {
                    initial.expand(channels, &format!("io block '{name}' initial_cmd"))?;
                }
            }
            BlockKind::Reader(_) => {}
            BlockKind::Recorder(recorder) => {
                if recorder.path.as_os_str().is_empty() {
                    return Err(invalid(format!("recorder '{name}' has an empty path")));
                }
            }
        }
        Ok(())
    }
}

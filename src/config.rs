//! Open-time configuration and the build-time hardware constraint table.
//!
//! The host hands the plugin a compound config node when a stream or control
//! is opened. [`ConfigNode`] is that tree in owned form; the FFI layer builds
//! it from `snd_config_t`, tests and the probe build it from TOML.

use alsa::pcm::Format;
use serde::Serialize;

use crate::error::{Error, Result};

/// Keys every ALSA plugin block may carry and the plugin ignores.
const IGNORED_KEYS: &[&str] = &["comment", "type", "hint"];

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Integer(i64),
    Real(f64),
    String(String),
    Compound(ConfigNode),
}

impl ConfigValue {
    /// Integer view of the value; strings are accepted when they parse.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(v) => Some(*v),
            ConfigValue::String(s) => s.trim().parse().ok(),
            ConfigValue::Real(_) | ConfigValue::Compound(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            ConfigValue::Integer(v) => v.to_string(),
            ConfigValue::Real(v) => v.to_string(),
            ConfigValue::String(s) => s.clone(),
            ConfigValue::Compound(_) => "{...}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    pub id: String,
    pub value: ConfigValue,
}

/// A compound configuration node: an ordered list of `(id, value)` children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigNode {
    entries: Vec<ConfigEntry>,
}

impl ConfigNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: impl Into<String>, value: ConfigValue) {
        self.entries.push(ConfigEntry {
            id: id.into(),
            value,
        });
    }

    pub fn with(mut self, id: impl Into<String>, value: ConfigValue) -> Self {
        self.push(id, value);
        self
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Parse a plugin block written as TOML, e.g. `type = "none"\nauto_advance = 1`.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Self::from_toml_table(table))
    }

    fn from_toml_table(table: toml::Table) -> Self {
        let mut node = ConfigNode::new();
        for (id, value) in table {
            node.push(id, toml_value(value));
        }
        node
    }
}

fn toml_value(value: toml::Value) -> ConfigValue {
    match value {
        toml::Value::Integer(v) => ConfigValue::Integer(v),
        toml::Value::Float(v) => ConfigValue::Real(v),
        toml::Value::Boolean(b) => ConfigValue::Integer(b as i64),
        toml::Value::String(s) => ConfigValue::String(s),
        toml::Value::Datetime(d) => ConfigValue::String(d.to_string()),
        // ALSA arrays are compounds keyed "0", "1", ...
        toml::Value::Array(items) => {
            let mut node = ConfigNode::new();
            for (i, item) in items.into_iter().enumerate() {
                node.push(i.to_string(), toml_value(item));
            }
            ConfigValue::Compound(node)
        }
        toml::Value::Table(t) => ConfigValue::Compound(ConfigNode::from_toml_table(t)),
    }
}

fn integer_key(entry: &ConfigEntry) -> Result<i64> {
    entry.value.as_integer().ok_or_else(|| Error::InvalidValue {
        key: entry.id.clone(),
        value: entry.value.describe(),
    })
}

/// Options recognised when a PCM stream is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PcmConfig {
    /// Verbose per-stream tracing.
    pub debug: bool,
    /// Reading the position pointer advances the virtual clock.
    pub auto_advance: bool,
}

impl PcmConfig {
    pub fn from_node(node: &ConfigNode) -> Result<Self> {
        let mut config = PcmConfig::default();
        for entry in node.entries() {
            match entry.id.as_str() {
                "debug" => config.debug = integer_key(entry)? != 0,
                "auto_advance" => config.auto_advance = integer_key(entry)? != 0,
                id if IGNORED_KEYS.contains(&id) => {}
                id => return Err(Error::UnknownKey(id.to_string())),
            }
        }
        Ok(config)
    }
}

/// The mixer stub takes no options of its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CtlConfig;

impl CtlConfig {
    pub fn from_node(node: &ConfigNode) -> Result<Self> {
        for entry in node.entries() {
            if !IGNORED_KEYS.contains(&entry.id.as_str()) {
                return Err(Error::UnknownKey(entry.id.clone()));
            }
        }
        Ok(CtlConfig)
    }
}

/// `conf_none_hook_load_if_running`: the none device never contributes
/// configuration of its own.
pub fn hook_load_if_running(_config: &ConfigNode) -> Option<ConfigNode> {
    None
}

/// Inclusive bounds for one negotiated hardware parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Range {
    pub min: u32,
    pub max: u32,
}

impl Range {
    pub fn contains(&self, value: u64) -> bool {
        value >= u64::from(self.min) && value <= u64::from(self.max)
    }

    pub fn check(&self, param: &'static str, value: u64) -> Result<()> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(Error::OutOfRange {
                param,
                value,
                min: u64::from(self.min),
                max: u64::from(self.max),
            })
        }
    }
}

/// Hardware constraint table, baked in from `config.toml` by the build script.
#[derive(Debug, Clone, PartialEq)]
pub struct HwConstraints {
    pub channels: Range,
    pub rate: Range,
    pub buffer_bytes: Range,
    pub period_bytes: Range,
    pub periods: Range,
    /// Sample formats the stream accepts.
    pub formats: Vec<Format>,
}

fn env_u32(value: &'static str, err: &'static str) -> std::result::Result<u32, &'static str> {
    value.parse().map_err(|_| err)
}

impl HwConstraints {
    /// Build the table from the values the build script read out of `config.toml`.
    pub fn new() -> std::result::Result<Self, &'static str> {
        let formats = env!("PCM_FORMATS")
            .split(',')
            .map(|name| format_from_name(name).ok_or("Failed to parse PCM_FORMATS"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            channels: Range {
                min: env_u32(env!("PCM_CHANNELS_MIN"), "Failed to parse PCM_CHANNELS_MIN")?,
                max: env_u32(env!("PCM_CHANNELS_MAX"), "Failed to parse PCM_CHANNELS_MAX")?,
            },
            rate: Range {
                min: env_u32(env!("PCM_RATE_MIN"), "Failed to parse PCM_RATE_MIN")?,
                max: env_u32(env!("PCM_RATE_MAX"), "Failed to parse PCM_RATE_MAX")?,
            },
            buffer_bytes: Range {
                min: env_u32(env!("PCM_BUFFER_BYTES_MIN"), "Failed to parse PCM_BUFFER_BYTES_MIN")?,
                max: env_u32(env!("PCM_BUFFER_BYTES_MAX"), "Failed to parse PCM_BUFFER_BYTES_MAX")?,
            },
            period_bytes: Range {
                min: env_u32(env!("PCM_PERIOD_BYTES_MIN"), "Failed to parse PCM_PERIOD_BYTES_MIN")?,
                max: env_u32(env!("PCM_PERIOD_BYTES_MAX"), "Failed to parse PCM_PERIOD_BYTES_MAX")?,
            },
            periods: Range {
                min: env_u32(env!("PCM_PERIODS_MIN"), "Failed to parse PCM_PERIODS_MIN")?,
                max: env_u32(env!("PCM_PERIODS_MAX"), "Failed to parse PCM_PERIODS_MAX")?,
            },
            formats,
        })
    }

    pub fn allows(&self, format: Format) -> bool {
        self.formats.contains(&format)
    }
}

impl Default for HwConstraints {
    fn default() -> Self {
        Self::new().expect("Failed to create HwConstraints from build-time environment variables")
    }
}

/// Sample rate a stream uses until hw params are negotiated.
pub fn default_rate() -> u32 {
    env!("PCM_DEFAULT_RATE").parse().unwrap_or(48000)
}

/// Frame width a stream uses until hw params are negotiated.
pub fn default_frame_bytes() -> usize {
    env!("PCM_DEFAULT_FRAME_BYTES").parse().unwrap_or(2)
}

pub const PLUGIN_NAME: &str = env!("PLUGIN_NAME");

/// Name reported to the host for every PCM stream.
pub const PCM_NAME: &str = env!("PCM_NAME");

pub fn format_from_name(name: &str) -> Option<Format> {
    let format = match name.trim() {
        "S8" => Format::S8,
        "U8" => Format::U8,
        "S16_LE" => Format::S16LE,
        "S16_BE" => Format::S16BE,
        "U16_LE" => Format::U16LE,
        "U16_BE" => Format::U16BE,
        "S32_LE" => Format::S32LE,
        "S32_BE" => Format::S32BE,
        "FLOAT_LE" => Format::FloatLE,
        "FLOAT_BE" => Format::FloatBE,
        "MU_LAW" => Format::MuLaw,
        "A_LAW" => Format::ALaw,
        _ => return None,
    };
    Some(format)
}

/// Bits one sample of `format` occupies in memory, for the formats the
/// plugin can be configured to accept.
pub fn physical_bits(format: Format) -> Option<u32> {
    match format {
        Format::S8 | Format::U8 | Format::MuLaw | Format::ALaw => Some(8),
        Format::S16LE | Format::S16BE | Format::U16LE | Format::U16BE => Some(16),
        Format::S32LE | Format::S32BE | Format::FloatLE | Format::FloatBE => Some(32),
        _ => None,
    }
}

//! INI-style configuration for the PTI pipeline.
//!
//! Sections `[file] [mode] [min_intensities] [max_intensities]
//! [output_phases] [system_phases]`, one `key = value` pair per line, `;`
//! starts an end-of-line comment. Values parse into a tagged sum: numeric
//! literal → float, single character → char, anything else → string
//! (booleans are the strings `true`/`false`). Consumers request a concrete
//! variant; a missing section/key or a variant mismatch fails with the
//! `section.key` path.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::types::{Calibration, PipelineOptions, PtiError, Result, DETECTORS};

/// Tagged configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Char(char),
    Float(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Parsed configuration store. Sections and keys keep a stable order so a
/// round-tripped file stays diffable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    sections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Config {
    /// Read and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        Ok(Config::parse(&text))
    }

    /// Parse config text. Unrecognized lines are skipped.
    pub fn parse(text: &str) -> Config {
        let mut config = Config::default();
        let mut section = String::new();
        for line in text.lines() {
            let line = match line.split_once(';') {
                Some((content, _comment)) => content,
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_string();
                config.sections.entry(section.clone()).or_default();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                config.set(&section, key.trim(), parse_value(value.trim()));
            }
        }
        config
    }

    /// Write the store back out.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.serialize())?;
        Ok(())
    }

    fn serialize(&self) -> String {
        let mut lines = Vec::new();
        for (section, entries) in &self.sections {
            lines.push(format!("[{section}]"));
            for (key, value) in entries {
                lines.push(format!("{key} = {value}"));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn get(&self, section: &str, key: &str) -> Result<&Value> {
        self.sections
            .get(section)
            .and_then(|entries| entries.get(key))
            .ok_or_else(|| PtiError::ConfigMissing {
                path: format!("{section}.{key}"),
            })
    }

    fn mismatch(section: &str, key: &str) -> PtiError {
        PtiError::ConfigMissing {
            path: format!("{section}.{key}"),
        }
    }

    pub fn float(&self, section: &str, key: &str) -> Result<f64> {
        match self.get(section, key)? {
            Value::Float(v) => Ok(*v),
            _ => Err(Self::mismatch(section, key)),
        }
    }

    pub fn string(&self, section: &str, key: &str) -> Result<&str> {
        match self.get(section, key)? {
            Value::Str(s) => Ok(s),
            _ => Err(Self::mismatch(section, key)),
        }
    }

    pub fn character(&self, section: &str, key: &str) -> Result<char> {
        match self.get(section, key)? {
            Value::Char(c) => Ok(*c),
            _ => Err(Self::mismatch(section, key)),
        }
    }

    /// Booleans are spelled `true` / `false`.
    pub fn boolean(&self, section: &str, key: &str) -> Result<bool> {
        match self.get(section, key)? {
            Value::Str(s) if s == "true" => Ok(true),
            Value::Str(s) if s == "false" => Ok(false),
            _ => Err(Self::mismatch(section, key)),
        }
    }

    /// Boolean with a default when the key is absent (a variant mismatch is
    /// still an error).
    pub fn boolean_or(&self, section: &str, key: &str, default: bool) -> Result<bool> {
        if self.get(section, key).is_err() {
            return Ok(default);
        }
        self.boolean(section, key)
    }
}

fn parse_value(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Float(v);
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Value::Char(c),
        _ => Value::Str(raw.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Pipeline mappings
// ---------------------------------------------------------------------------

const DETECTOR_KEYS: [&str; DETECTORS] = ["detector_1", "detector_2", "detector_3"];

/// Mode flags from the `[mode]` section.
pub fn options_from_config(config: &Config) -> Result<PipelineOptions> {
    let defaults = PipelineOptions::default();
    Ok(PipelineOptions {
        online: config.boolean("mode", "online")?,
        offline: config.boolean("mode", "offline")?,
        verbose: config.boolean("mode", "verbose")?,
        common_noise_rejection: config.boolean_or(
            "mode",
            "common_noise_rejection",
            defaults.common_noise_rejection,
        )?,
    })
}

/// The CSV field separator from `[file] delimiter`, defaulting to a comma.
pub fn delimiter_from_config(config: &Config) -> Result<char> {
    match config.get("file", "delimiter") {
        Ok(_) => config.character("file", "delimiter"),
        Err(_) => Ok(','),
    }
}

/// Calibration constants from the four detector sections.
pub fn calibration_from_config(config: &Config) -> Result<Calibration> {
    let mut calibration = Calibration {
        min_intensity: [0.0; DETECTORS],
        max_intensity: [0.0; DETECTORS],
        output_phase: [0.0; DETECTORS],
        system_phase: [0.0; DETECTORS],
        swapped: config.boolean("output_phases", "phases_swapped")?,
    };
    for (d, key) in DETECTOR_KEYS.iter().enumerate() {
        calibration.min_intensity[d] = config.float("min_intensities", key)?;
        calibration.max_intensity[d] = config.float("max_intensities", key)?;
        calibration.output_phase[d] = config.float("output_phases", key)?;
        calibration.system_phase[d] = config.float("system_phases", key)?;
    }
    calibration.validate()?;
    Ok(calibration)
}

/// Persist a phase-scan result into the store.
pub fn store_calibration(config: &mut Config, calibration: &Calibration) {
    for (d, key) in DETECTOR_KEYS.iter().enumerate() {
        config.set("min_intensities", key, Value::Float(calibration.min_intensity[d]));
        config.set("max_intensities", key, Value::Float(calibration.max_intensity[d]));
        config.set("output_phases", key, Value::Float(calibration.output_phase[d]));
        config.set("system_phases", key, Value::Float(calibration.system_phase[d]));
    }
    config.set(
        "output_phases",
        "phases_swapped",
        Value::Str(calibration.swapped.to_string()),
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::*;
use super::error::ConfigError;
use super::word_decoder::DecoderConfig;

/// On-disk list data formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileFormat {
    /// Legacy fixed 8194-word buffers
    #[default]
    Ldf,
    /// Pixie list data, variable length buffers
    Pld,
}

/// Where spills come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputFormat {
    /// A file; the format is taken from its first buffer
    #[default]
    Auto,
    Ldf,
    Pld,
    /// Live chunked UDP from the acquisition
    Shm,
}

impl InputFormat {
    /// The forced file format, if any
    pub fn file_format(&self) -> Option<FileFormat> {
        match self {
            Self::Ldf => Some(FileFormat::Ldf),
            Self::Pld => Some(FileFormat::Pld),
            Self::Auto | Self::Shm => None,
        }
    }
}

/// Structure representing the application configuration. Contains pathing, decode and
/// correlation settings.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_path: Option<PathBuf>,
    pub input_format: InputFormat,
    pub output_path: Option<PathBuf>,
    pub output_format: FileFormat,
    pub run_title: String,
    pub run_number: u32,
    /// Correlation window in clock ticks
    pub event_width: u64,
    /// Keep the open tail across spill boundaries instead of discarding it
    pub carry_tail: bool,
    pub first_slot: u8,
    pub saturation_energy: u32,
    pub shm_port: u16,
    pub receive_timeout_ms: u64,
    /// host:port to send statistics snapshots to
    pub stats_address: Option<String>,
    pub stats_interval_s: u64,
    /// Decode and correlate, but do not hand events to the analyzer
    pub dry_run: bool,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: None,
            input_format: InputFormat::Auto,
            output_path: None,
            output_format: FileFormat::Ldf,
            run_title: String::from("pixie_scan"),
            run_number: 0,
            event_width: DEFAULT_EVENT_WIDTH,
            carry_tail: false,
            first_slot: DEFAULT_FIRST_SLOT,
            saturation_energy: DEFAULT_SATURATION_ENERGY,
            shm_port: DEFAULT_SHM_PORT,
            receive_timeout_ms: 500,
            stats_address: None,
            stats_interval_s: 3,
            dry_run: false,
            debug: false,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Check the settings hang together before a run starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_width == 0 {
            return Err(ConfigError::BadEventWidth(self.event_width));
        }
        if !self.is_live() {
            match &self.input_path {
                None => return Err(ConfigError::MissingInput(format!("{:?}", self.input_format))),
                Some(path) if !path.exists() => {
                    return Err(ConfigError::BadFilePath(path.clone()))
                }
                Some(_) => (),
            }
        }
        if let Some(parent) = self.output_path.as_ref().and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::BadFilePath(parent.to_path_buf()));
            }
        }
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.input_format == InputFormat::Shm
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            first_slot: self.first_slot,
            saturation_energy: self.saturation_energy,
        }
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_s)
    }
}

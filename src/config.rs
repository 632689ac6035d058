use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::waterfall::CoreConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value in environment variable {key}: {message}")]
    BadEnvValue { key: String, message: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Runtime configuration, loaded from a TOML file with `WATERFALL_*`
/// environment overrides on top.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// FFT size N.
    #[serde(default = "default_fft_bins")]
    pub fft_bins: usize,

    /// Samples shared between successive FFT windows.
    #[serde(default = "default_fft_overlap")]
    pub fft_overlap: usize,

    /// Observatory name: ORIGIN header and file name token.
    #[serde(default = "default_location_name")]
    pub location_name: String,

    /// Snapshot tile duration in seconds.
    #[serde(default = "default_snapshot_length")]
    pub waterfall_snapshot_length: f32,

    /// Low edge of the recorded band in Hz; equal edges mean full band.
    #[serde(default)]
    pub waterfall_left_freq: f32,

    /// High edge of the recorded band in Hz.
    #[serde(default)]
    pub waterfall_right_freq: f32,

    /// Ring buffer chunk size limit in bytes.
    #[serde(default = "default_chunk_size")]
    pub waterfall_chunk_size: usize,

    /// Directory snapshot tiles are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Live-capture input device name, or "default".
    #[serde(default = "default_audio_device")]
    pub audio_device: String,

    /// Q-channel gain correction.
    #[serde(default)]
    pub iq_gain: f64,

    /// Q-channel delay correction in samples.
    #[serde(default)]
    pub iq_phase_shift: usize,

    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_fft_bins() -> usize {
    32_768
}

fn default_fft_overlap() -> usize {
    24_576
}

fn default_location_name() -> String {
    "unknown".to_string()
}

fn default_snapshot_length() -> f32 {
    1.0
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_audio_device() -> String {
    crate::input::live::DEFAULT_DEVICE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fft_bins: default_fft_bins(),
            fft_overlap: default_fft_overlap(),
            location_name: default_location_name(),
            waterfall_snapshot_length: default_snapshot_length(),
            waterfall_left_freq: 0.0,
            waterfall_right_freq: 0.0,
            waterfall_chunk_size: default_chunk_size(),
            output_dir: default_output_dir(),
            audio_device: default_audio_device(),
            iq_gain: 0.0,
            iq_phase_shift: 0,
            log_level: default_log_level(),
        }
    }
}

fn env_override<T>(key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = env::var(key) {
        *target = value.parse().map_err(|e: T::Err| ConfigError::BadEnvValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

impl Config {
    /// Default config file location (XDG config dir on Linux).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "waterfall").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or the default location), apply environment
    /// overrides and validate. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match &path {
            Some(path) if path.exists() => {
                info!("Loading config from \"{}\"", path.display());
                toml::from_str(&fs::read_to_string(path)?)?
            }
            _ => {
                info!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string (missing keys fall back to defaults).
    #[allow(dead_code)]
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_override("WATERFALL_FFT_BINS", &mut self.fft_bins)?;
        env_override("WATERFALL_FFT_OVERLAP", &mut self.fft_overlap)?;
        env_override("WATERFALL_LOCATION_NAME", &mut self.location_name)?;
        env_override(
            "WATERFALL_SNAPSHOT_LENGTH",
            &mut self.waterfall_snapshot_length,
        )?;
        env_override("WATERFALL_LEFT_FREQ", &mut self.waterfall_left_freq)?;
        env_override("WATERFALL_RIGHT_FREQ", &mut self.waterfall_right_freq)?;
        env_override("WATERFALL_CHUNK_SIZE", &mut self.waterfall_chunk_size)?;
        env_override("WATERFALL_OUTPUT_DIR", &mut self.output_dir)?;
        env_override("WATERFALL_AUDIO_DEVICE", &mut self.audio_device)?;
        env_override("WATERFALL_IQ_GAIN", &mut self.iq_gain)?;
        env_override("WATERFALL_IQ_PHASE_SHIFT", &mut self.iq_phase_shift)?;
        env_override("WATERFALL_LOG_LEVEL", &mut self.log_level)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fft_bins < 2 {
            return Err(ConfigError::Validation(format!(
                "fft_bins must be at least 2 (got {})",
                self.fft_bins
            )));
        }
        if self.fft_overlap >= self.fft_bins {
            return Err(ConfigError::Validation(format!(
                "fft_overlap ({}) must be smaller than fft_bins ({})",
                self.fft_overlap, self.fft_bins
            )));
        }
        if self.waterfall_snapshot_length <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "waterfall_snapshot_length must be positive (got {})",
                self.waterfall_snapshot_length
            )));
        }
        if self.waterfall_chunk_size == 0 {
            return Err(ConfigError::Validation(
                "waterfall_chunk_size must be positive".to_string(),
            ));
        }
        if self.waterfall_left_freq > self.waterfall_right_freq {
            return Err(ConfigError::Validation(format!(
                "waterfall_left_freq ({}) must not exceed waterfall_right_freq ({})",
                self.waterfall_left_freq, self.waterfall_right_freq
            )));
        }
        Ok(())
    }

    /// The core's slice of the configuration.
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            origin: self.location_name.clone(),
            bins: self.fft_bins,
            overlap: self.fft_overlap,
            chunk_size: self.waterfall_chunk_size,
            output_dir: self.output_dir.clone(),
            iq_gain: self.iq_gain,
            iq_phase_shift: self.iq_phase_shift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fft_bins, 32_768);
        assert_eq!(config.fft_overlap, 24_576);
        assert_eq!(config.location_name, "unknown");
        assert_eq!(config.waterfall_snapshot_length, 1.0);
        assert_eq!(config.waterfall_left_freq, 0.0);
        assert_eq!(config.waterfall_right_freq, 0.0);
        assert_eq!(config.waterfall_chunk_size, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            fft_bins = 1024
            fft_overlap = 512
            location_name = "ondrejov"
            "#,
        )
        .unwrap();

        assert_eq!(config.fft_bins, 1024);
        assert_eq!(config.fft_overlap, 512);
        assert_eq!(config.location_name, "ondrejov");
        assert_eq!(config.waterfall_snapshot_length, 1.0);
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_bins() {
        let err = Config::from_toml("fft_bins = 1024\nfft_overlap = 1024\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_rejects_inverted_band() {
        let err = Config::from_toml(
            "waterfall_left_freq = 1000.0\nwaterfall_right_freq = -1000.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::default();
        env::set_var("WATERFALL_FFT_BINS", "2048");
        env::set_var("WATERFALL_LOCATION_NAME", "chilbolton");

        config.apply_env().unwrap();
        env::remove_var("WATERFALL_FFT_BINS");
        env::remove_var("WATERFALL_LOCATION_NAME");

        assert_eq!(config.fft_bins, 2048);
        assert_eq!(config.location_name, "chilbolton");
    }

    #[test]
    fn test_env_override_bad_value() {
        let mut config = Config::default();
        env::set_var("WATERFALL_IQ_PHASE_SHIFT", "not-a-number");

        let err = config.apply_env().unwrap_err();
        env::remove_var("WATERFALL_IQ_PHASE_SHIFT");

        assert!(matches!(err, ConfigError::BadEnvValue { .. }));
    }

    #[test]
    fn test_core_config_mapping() {
        let config = Config::from_toml(
            r#"
            fft_bins = 4096
            fft_overlap = 2048
            location_name = "site"
            iq_gain = 0.25
            iq_phase_shift = 3
            "#,
        )
        .unwrap();

        let core = config.core_config();
        assert_eq!(core.bins, 4096);
        assert_eq!(core.overlap, 2048);
        assert_eq!(core.origin, "site");
        assert_eq!(core.iq_gain, 0.25);
        assert_eq!(core.iq_phase_shift, 3);
    }
}

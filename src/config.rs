//! Runtime configuration for camera sessions
//!
//! Loaded from TOML. Covers analysis defaults, recording timeouts, capability
//! policies and the brightness-to-exposure mapping.

use crate::capability::MultiSensorPolicy;
use crate::errors::SessionError;
use crate::types::{AnalysisFormat, HardwareLevel, VideoQuality};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub capabilities: CapabilityConfig,
    #[serde(default)]
    pub exposure: ExposureConfig,
}

/// Analysis stream defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Width used when a request leaves it unset
    pub default_width: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    pub default_format: AnalysisFormat,
    /// Depth of the consumer hand-off queue
    pub consumer_capacity: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_width: 1024,
            jpeg_quality: 80,
            default_format: AnalysisFormat::Nv21,
            consumer_capacity: 4,
        }
    }
}

/// Video recording configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Bounded wait for a stop acknowledgement, in milliseconds
    pub stop_timeout_ms: u64,
    pub default_quality: VideoQuality,
    pub enable_audio: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 5000,
            default_quality: VideoQuality::Highest,
            enable_audio: true,
        }
    }
}

impl RecordingConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Capability ceilings and downgrade policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Lowest hardware level that may bind video capture and analysis together
    pub video_analysis_min_level: HardwareLevel,
    pub multi_sensor_policy: MultiSensorPolicy,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            video_analysis_min_level: HardwareLevel::Level3,
            multi_sensor_policy: MultiSensorPolicy::Downgrade,
        }
    }
}

/// How normalised brightness maps onto a device's exposure index range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureMapping {
    /// `min + brightness * (max - min)`
    #[default]
    Linear,
    /// 0.5 is index 0; each half spans one side of the range
    Centered,
}

impl ExposureMapping {
    /// Exposure index for `brightness` in [0, 1], rounded to the nearest step
    pub fn index_for(&self, brightness: f32, min_index: i32, max_index: i32) -> i32 {
        let (min_index, max_index) = (min_index.min(max_index), min_index.max(max_index));
        let b = brightness.clamp(0.0, 1.0);
        let (min, max) = (min_index as f32, max_index as f32);
        let value = match self {
            ExposureMapping::Linear => min + b * (max - min),
            ExposureMapping::Centered => {
                if b < 0.5 {
                    min * (1.0 - b * 2.0)
                } else {
                    max * ((b - 0.5) * 2.0)
                }
            }
        };
        (value.round() as i32).clamp(min_index, max_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExposureConfig {
    pub mapping: ExposureMapping,
}

impl SessionConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("Failed to read config file: {}", e)))?;

        let config: SessionConfig = toml::from_str(&contents)
            .map_err(|e| SessionError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SessionError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SessionError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| SessionError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| SessionError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcam-session.toml")
    }

    /// Load from default location, falling back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.analysis.default_width == 0 {
            return Err(SessionError::Config("Analysis width must be positive".to_string()));
        }
        if self.analysis.jpeg_quality == 0 || self.analysis.jpeg_quality > 100 {
            return Err(SessionError::Config(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }
        if self.analysis.consumer_capacity == 0 {
            return Err(SessionError::Config(
                "Consumer capacity must be at least 1".to_string(),
            ));
        }
        if self.recording.stop_timeout_ms == 0 || self.recording.stop_timeout_ms > 60_000 {
            return Err(SessionError::Config(
                "Stop timeout must be between 1 and 60000 ms".to_string(),
            ));
        }
        Ok(())
    }
}

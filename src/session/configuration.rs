//! Desired session parameters
//!
//! A `CaptureConfiguration` is the single source of truth the binder derives
//! every binding from. It is plain data; mutating it never touches hardware.

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::types::{
    AnalysisSettings, AspectRatio, CaptureMode, ExtensionMode, FlashMode, Sensor, Size,
    VideoQuality,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfiguration {
    /// Primary sensor first
    pub sensors: Vec<Sensor>,
    pub capture_mode: CaptureMode,
    pub aspect_ratio: AspectRatio,
    pub flash_mode: FlashMode,
    /// Normalised linear zoom in [0, 1]
    pub zoom: f32,
    pub mirror_front_camera: bool,
    /// Read when a recording starts; never affects one in progress
    pub enable_audio_recording: bool,
    /// Present means analysis is enabled
    pub analysis: Option<AnalysisSettings>,
    pub photo_size: Option<Size>,
    pub preview_size: Option<Size>,
    pub extension: Option<ExtensionMode>,
    pub video_quality: VideoQuality,
}

impl CaptureConfiguration {
    pub fn new(sensors: Vec<Sensor>) -> Self {
        Self {
            sensors,
            capture_mode: CaptureMode::default(),
            aspect_ratio: AspectRatio::default(),
            flash_mode: FlashMode::default(),
            zoom: 0.0,
            mirror_front_camera: false,
            enable_audio_recording: true,
            analysis: None,
            photo_size: None,
            preview_size: None,
            extension: None,
            video_quality: VideoQuality::default(),
        }
    }

    pub fn with_capture_mode(mut self, mode: CaptureMode) -> Self {
        self.capture_mode = mode;
        self
    }

    pub fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = ratio;
        self
    }

    pub fn with_flash_mode(mut self, mode: FlashMode) -> Self {
        self.flash_mode = mode;
        self
    }

    pub fn with_zoom(mut self, zoom: f32) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.enable_audio_recording = enabled;
        self
    }

    pub fn with_analysis(mut self, settings: AnalysisSettings) -> Self {
        self.analysis = Some(settings);
        self
    }

    pub fn with_mirror_front_camera(mut self, mirror: bool) -> Self {
        self.mirror_front_camera = mirror;
        self
    }

    pub fn with_extension(mut self, extension: ExtensionMode) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn with_video_quality(mut self, quality: VideoQuality) -> Self {
        self.video_quality = quality;
        self
    }

    /// Reject configurations no binding could honour
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.sensors.is_empty() {
            return Err(SessionError::configuration("at least one sensor is required"));
        }
        if let Some(duplicate) = first_duplicate(&self.sensors) {
            return Err(SessionError::configuration(format!(
                "{:?} sensor requested more than once",
                duplicate.position
            )));
        }
        if !self.zoom.is_finite() || !(0.0..=1.0).contains(&self.zoom) {
            return Err(SessionError::configuration(format!(
                "zoom {} outside [0, 1]",
                self.zoom
            )));
        }
        if self.capture_mode == CaptureMode::AnalysisOnly && self.analysis.is_none() {
            return Err(SessionError::configuration(
                "analysis-only mode requires analysis settings",
            ));
        }
        if let Some(settings) = &self.analysis {
            if let Some(fps) = settings.max_frames_per_second {
                if !fps.is_finite() || fps <= 0.0 {
                    return Err(SessionError::configuration(format!(
                        "invalid analysis rate {}",
                        fps
                    )));
                }
            }
        }
        for size in [self.photo_size, self.preview_size].into_iter().flatten() {
            if size.width == 0 || size.height == 0 {
                return Err(SessionError::configuration(format!(
                    "empty target size {}x{}",
                    size.width, size.height
                )));
            }
        }
        Ok(())
    }

    pub fn primary_sensor(&self) -> Option<&Sensor> {
        self.sensors.first()
    }

    pub fn analysis_enabled(&self) -> bool {
        self.analysis.is_some()
    }

    /// Photos get horizontal-mirror metadata only from a single front sensor
    pub fn mirrors_photos(&self) -> bool {
        self.mirror_front_camera && self.sensors.len() == 1 && self.sensors[0].is_front()
    }
}

/// First sensor that overlaps an earlier one in `sensors`
pub fn first_duplicate(sensors: &[Sensor]) -> Option<&Sensor> {
    sensors
        .iter()
        .enumerate()
        .find(|(i, sensor)| sensors[..*i].iter().any(|earlier| earlier.overlaps(sensor)))
        .map(|(_, sensor)| sensor)
}

/// A sensor rotation of 0 or 180 degrees means the sensor is portrait
pub fn is_portrait(sensor_rotation_degrees: i32) -> bool {
    sensor_rotation_degrees.rem_euclid(180) == 0
}

/// Orient a requested size to the sensor: unchanged when portrait, swapped otherwise
pub fn oriented_size(size: Size, sensor_rotation_degrees: i32) -> Size {
    if is_portrait(sensor_rotation_degrees) {
        size
    } else {
        size.swapped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnalysisFormat;

    #[test]
    fn test_defaults() {
        let config = CaptureConfiguration::new(vec![Sensor::back()]);
        assert_eq!(config.capture_mode, CaptureMode::Photo);
        assert_eq!(config.flash_mode, FlashMode::None);
        assert!(config.enable_audio_recording);
        assert!(!config.analysis_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_sensors_and_bad_zoom() {
        assert!(CaptureConfiguration::new(vec![]).validate().is_err());
        let config = CaptureConfiguration::new(vec![Sensor::back()]).with_zoom(1.5);
        assert!(matches!(config.validate(), Err(SessionError::Configuration(_))));
        let config = CaptureConfiguration::new(vec![Sensor::back()]).with_zoom(f32::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_analysis_rate() {
        let mut settings = AnalysisSettings::new(AnalysisFormat::Jpeg);
        settings.max_frames_per_second = Some(-1.0);
        let config = CaptureConfiguration::new(vec![Sensor::back()]).with_analysis(settings);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_analysis_only_requires_settings() {
        let config = CaptureConfiguration::new(vec![Sensor::back()])
            .with_capture_mode(CaptureMode::AnalysisOnly);
        assert!(config.validate().is_err());
        let config = config.with_analysis(AnalysisSettings::new(AnalysisFormat::Rgba8888));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mirror_only_for_single_front_sensor() {
        let single = CaptureConfiguration::new(vec![Sensor::front()]).with_mirror_front_camera(true);
        assert!(single.mirrors_photos());
        let dual = CaptureConfiguration::new(vec![Sensor::front(), Sensor::back()])
            .with_mirror_front_camera(true);
        assert!(!dual.mirrors_photos());
        let back = CaptureConfiguration::new(vec![Sensor::back()]).with_mirror_front_camera(true);
        assert!(!back.mirrors_photos());
    }

    #[test]
    fn test_validation_rejects_duplicate_sensors() {
        let config = CaptureConfiguration::new(vec![Sensor::back(), Sensor::back()]);
        assert!(matches!(config.validate(), Err(SessionError::Configuration(_))));
        // an unqualified back sensor may resolve to the same device as a qualified one
        let config = CaptureConfiguration::new(vec![Sensor::back().with_device_id("0"), Sensor::back()]);
        assert!(config.validate().is_err());
        let config = CaptureConfiguration::new(vec![
            Sensor::back().with_device_id("0"),
            Sensor::back().with_device_id("2"),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_orientation() {
        assert!(is_portrait(0));
        assert!(is_portrait(180));
        assert!(!is_portrait(90));
        assert_eq!(oriented_size(Size::new(1920, 1080), 90), Size::new(1080, 1920));
        assert_eq!(oriented_size(Size::new(1920, 1080), 0), Size::new(1920, 1080));
    }
}

//! Hardware capability queries and graceful downgrade decisions
//!
//! Results are snapshots: another process can grab a camera between two
//! calls, so nothing here is cached across bind attempts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::platform::CameraProvider;
use crate::types::{ExtensionMode, HardwareLevel, Sensor, SensorPosition};

/// A requested feature that was reduced to what the hardware supports.
///
/// Not an error: the bind still succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityDowngrade {
    /// Only the primary sensor was bound
    ConcurrentCamerasUnsupported { requested: usize },
    /// Analysis was dropped from a video binding
    AnalysisUnsupportedWithVideo {
        level: HardwareLevel,
        required: HardwareLevel,
    },
    ExtensionUnavailable { mode: ExtensionMode },
}

/// What to do with several sensors on hardware without concurrent support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiSensorPolicy {
    /// Bind `sensors[0]` only and report a downgrade
    #[default]
    Downgrade,
    /// Fail with a configuration error
    Reject,
}

/// Read-only capability view over a camera provider
#[derive(Clone)]
pub struct CapabilityProbe {
    provider: Arc<dyn CameraProvider>,
}

impl CapabilityProbe {
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        Self { provider }
    }

    /// Whether the provider enumerates a sensor matching `sensor`
    pub fn has_sensor(&self, sensor: &Sensor) -> bool {
        self.provider.sensors().iter().any(|available| available.matches(sensor))
    }

    pub fn supports_concurrent_cameras(&self) -> bool {
        self.provider.supports_concurrent_cameras()
    }

    pub fn hardware_level(&self, sensor: &Sensor) -> HardwareLevel {
        self.provider.hardware_level(sensor)
    }

    pub fn extension_available(&self, mode: ExtensionMode, sensor: &Sensor) -> bool {
        self.provider.extension_available(mode, sensor)
    }

    /// Whether video capture and analysis can be bound together on `position`
    pub fn video_with_analysis_supported(&self, position: SensorPosition, required: HardwareLevel) -> bool {
        self.hardware_level(&Sensor::new(position)) >= required
    }

    /// Sensors that can actually be bound together, plus the downgrade if any
    pub fn resolve_sensors(
        &self,
        sensors: &[Sensor],
        policy: MultiSensorPolicy,
    ) -> Result<(Vec<Sensor>, Option<CapabilityDowngrade>), SessionError> {
        let Some(primary) = sensors.first() else {
            return Err(SessionError::configuration("at least one sensor is required"));
        };
        if sensors.len() == 1 || self.supports_concurrent_cameras() {
            return Ok((sensors.to_vec(), None));
        }

        match policy {
            MultiSensorPolicy::Downgrade => {
                log::warn!(
                    "Concurrent cameras unsupported, binding primary sensor only ({} requested)",
                    sensors.len()
                );
                Ok((
                    vec![primary.clone()],
                    Some(CapabilityDowngrade::ConcurrentCamerasUnsupported {
                        requested: sensors.len(),
                    }),
                ))
            }
            MultiSensorPolicy::Reject => Err(SessionError::configuration(format!(
                "{} sensors requested but concurrent cameras are not supported",
                sensors.len()
            ))),
        }
    }

    /// `Some(downgrade)` when video plus analysis exceeds the primary sensor's level
    pub fn check_video_analysis(&self, primary: &Sensor, required: HardwareLevel) -> Option<CapabilityDowngrade> {
        let level = self.hardware_level(primary);
        if level >= required {
            None
        } else {
            log::warn!(
                "Hardware level {:?} below {:?}, dropping analysis from video binding",
                level,
                required
            );
            Some(CapabilityDowngrade::AnalysisUnsupportedWithVideo { level, required })
        }
    }
}

impl std::fmt::Debug for CapabilityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProbe").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCameraProvider;

    #[test]
    fn test_single_sensor_never_downgrades() {
        let probe = CapabilityProbe::new(Arc::new(FakeCameraProvider::new()));
        let (sensors, downgrade) = probe
            .resolve_sensors(&[Sensor::front()], MultiSensorPolicy::Reject)
            .unwrap();
        assert_eq!(sensors, vec![Sensor::front()]);
        assert!(downgrade.is_none());
    }

    #[test]
    fn test_sensor_availability_from_enumeration() {
        let probe = CapabilityProbe::new(Arc::new(FakeCameraProvider::new()));
        assert!(probe.has_sensor(&Sensor::back()));
        assert!(probe.has_sensor(&Sensor::front().with_device_id("1")));
        assert!(!probe.has_sensor(&Sensor::back().with_device_id("7")));
    }

    #[test]
    fn test_multi_sensor_downgrades_to_primary() {
        let provider = FakeCameraProvider::new().with_concurrent_support(false);
        let probe = CapabilityProbe::new(Arc::new(provider));
        let (sensors, downgrade) = probe
            .resolve_sensors(&[Sensor::back(), Sensor::front()], MultiSensorPolicy::Downgrade)
            .unwrap();
        assert_eq!(sensors, vec![Sensor::back()]);
        assert_eq!(
            downgrade,
            Some(CapabilityDowngrade::ConcurrentCamerasUnsupported { requested: 2 })
        );
    }

    #[test]
    fn test_multi_sensor_reject_policy() {
        let provider = FakeCameraProvider::new().with_concurrent_support(false);
        let probe = CapabilityProbe::new(Arc::new(provider));
        let result = probe.resolve_sensors(&[Sensor::back(), Sensor::front()], MultiSensorPolicy::Reject);
        assert!(matches!(result, Err(SessionError::Configuration(_))));
    }

    #[test]
    fn test_concurrent_support_keeps_all_sensors() {
        let provider = FakeCameraProvider::new().with_concurrent_support(true);
        let probe = CapabilityProbe::new(Arc::new(provider));
        let (sensors, downgrade) = probe
            .resolve_sensors(&[Sensor::back(), Sensor::front()], MultiSensorPolicy::Downgrade)
            .unwrap();
        assert_eq!(sensors.len(), 2);
        assert!(downgrade.is_none());
    }

    #[test]
    fn test_video_analysis_level() {
        let provider = FakeCameraProvider::new()
            .with_hardware_level(SensorPosition::Back, HardwareLevel::Full)
            .with_hardware_level(SensorPosition::Front, HardwareLevel::Level3);
        let probe = CapabilityProbe::new(Arc::new(provider));
        assert!(!probe.video_with_analysis_supported(SensorPosition::Back, HardwareLevel::Level3));
        assert!(probe.video_with_analysis_supported(SensorPosition::Front, HardwareLevel::Level3));
        assert!(probe.check_video_analysis(&Sensor::back(), HardwareLevel::Level3).is_some());
        assert!(probe.check_video_analysis(&Sensor::back(), HardwareLevel::Full).is_none());
    }
}

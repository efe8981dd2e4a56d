//! Camera provider contract
//!
//! A provider is whatever native camera stack sits underneath the session:
//! it enumerates sensors, binds a set of use cases to one sensor (or several
//! concurrently), hands back a control surface per bound sensor and delivers
//! analysis frames to a [`FrameSink`]. The session never touches a native
//! handle directly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::analysis::frame::Frame;
use crate::errors::ProviderError;
use crate::session::use_cases::UseCaseSet;
use crate::types::{ExtensionMode, HardwareLevel, Rational, Sensor, Size};

/// Receives analysis frames on the provider's delivery thread
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: Frame);
}

/// Everything needed to bind one sensor
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub sensor: Sensor,
    pub use_cases: UseCaseSet,
    /// Viewport crop applied after bind; carries the square ratio
    pub viewport: Rational,
    pub extension: Option<ExtensionMode>,
}

/// Zoom ratio range and current linear position of a bound device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomState {
    pub min_ratio: f32,
    pub max_ratio: f32,
    pub linear: f32,
}

impl ZoomState {
    /// Linear [0, 1] position to zoom ratio
    pub fn linear_to_ratio(&self, linear: f32) -> f32 {
        let linear = linear.clamp(0.0, 1.0);
        self.min_ratio + linear * (self.max_ratio - self.min_ratio)
    }
}

/// Exposure compensation index range of a bound device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureState {
    pub min_index: i32,
    pub max_index: i32,
    pub index: i32,
}

/// Normalised [0, 1] metering point on the preview
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeteringPoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRequest {
    pub path: PathBuf,
    /// Set for a single front sensor with mirroring enabled
    pub mirror_horizontally: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRequest {
    pub path: PathBuf,
    pub with_audio: bool,
}

/// Completion of an asynchronous capture: the written file or the failure
pub type CaptureAck = oneshot::Receiver<Result<PathBuf, ProviderError>>;

/// Native camera stack the session binds against
pub trait CameraProvider: Send + Sync {
    /// Physical sensors currently present
    fn sensors(&self) -> Vec<Sensor>;

    fn supports_concurrent_cameras(&self) -> bool;

    fn hardware_level(&self, sensor: &Sensor) -> HardwareLevel;

    fn extension_available(&self, mode: ExtensionMode, sensor: &Sensor) -> bool;

    /// Bind one sensor. Fails if anything else is still bound.
    fn bind(&self, request: &BindRequest) -> Result<Arc<dyn BoundCamera>, ProviderError>;

    /// Bind several sensors as one concurrent session
    fn bind_concurrent(&self, requests: &[BindRequest]) -> Result<Vec<Arc<dyn BoundCamera>>, ProviderError>;

    /// Tear down every binding. Returns once the hardware is free.
    fn unbind_all(&self);
}

/// Control surface of one bound sensor
pub trait BoundCamera: Send + Sync {
    fn sensor(&self) -> Sensor;

    fn enable_torch(&self, enabled: bool) -> Result<(), ProviderError>;

    fn zoom_state(&self) -> ZoomState;

    fn set_linear_zoom(&self, linear: f32) -> Result<(), ProviderError>;

    fn exposure_state(&self) -> ExposureState;

    fn set_exposure_index(&self, index: i32) -> Result<(), ProviderError>;

    /// Sensor orientation relative to the device's natural orientation
    fn sensor_rotation_degrees(&self) -> i32;

    /// `auto_cancel` of `None` keeps the metering region until the next request
    fn start_focus_and_metering(
        &self,
        point: MeteringPoint,
        auto_cancel: Option<Duration>,
    ) -> Result<(), ProviderError>;

    fn available_preview_sizes(&self) -> Vec<Size>;

    /// Requires a bound still-capture use case
    fn take_picture(&self, request: PhotoRequest) -> Result<CaptureAck, ProviderError>;

    /// Requires a bound video-capture use case
    fn start_recording(&self, request: RecordingRequest) -> Result<Box<dyn ActiveRecording>, ProviderError>;
}

/// A recording in progress on one sensor
pub trait ActiveRecording: Send {
    fn pause(&mut self) -> Result<(), ProviderError>;

    fn resume(&mut self) -> Result<(), ProviderError>;

    /// Stop and release the recording; the ack arrives once the file is finalised
    fn stop(self: Box<Self>) -> CaptureAck;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_to_ratio() {
        let zoom = ZoomState {
            min_ratio: 1.0,
            max_ratio: 8.0,
            linear: 0.0,
        };
        assert_eq!(zoom.linear_to_ratio(0.0), 1.0);
        assert_eq!(zoom.linear_to_ratio(0.5), 4.5);
        assert_eq!(zoom.linear_to_ratio(2.0), 8.0);
    }
}

//! Configuration file tests
//!
//! Run with: cargo test --test config_test

use std::sync::Arc;

use crabcam_session::capability::MultiSensorPolicy;
use crabcam_session::config::{ExposureMapping, SessionConfig};
use crabcam_session::errors::SessionError;
use crabcam_session::session::CameraSession;
use crabcam_session::testing::FakeCameraProvider;
use crabcam_session::types::{AnalysisFormat, HardwareLevel, Sensor, VideoQuality};
use tempfile::tempdir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.toml");

    let mut config = SessionConfig::default();
    config.analysis.default_format = AnalysisFormat::Jpeg;
    config.analysis.jpeg_quality = 92;
    config.recording.stop_timeout_ms = 1500;
    config.capabilities.video_analysis_min_level = HardwareLevel::Full;
    config.capabilities.multi_sensor_policy = MultiSensorPolicy::Reject;
    config.exposure.mapping = ExposureMapping::Centered;

    config.save_to_file(&path).unwrap();
    let loaded = SessionConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_partial_file_uses_section_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("partial.toml");
    std::fs::write(
        &path,
        "[recording]\nstop_timeout_ms = 250\ndefault_quality = \"sd\"\nenable_audio = false\n",
    )
    .unwrap();

    let loaded = SessionConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded.recording.stop_timeout_ms, 250);
    assert_eq!(loaded.recording.default_quality, VideoQuality::Sd);
    assert_eq!(loaded.analysis, SessionConfig::default().analysis);
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(
        &path,
        "[analysis]\ndefault_width = 0\njpeg_quality = 80\ndefault_format = \"nv21\"\nconsumer_capacity = 4\n",
    )
    .unwrap();
    assert!(matches!(
        SessionConfig::load_from_file(&path),
        Err(SessionError::Config(_))
    ));

    std::fs::write(&path, "this is not toml [").unwrap();
    assert!(SessionConfig::load_from_file(&path).is_err());
}

#[test]
fn test_invalid_settings_refuse_session() {
    let mut settings = SessionConfig::default();
    settings.analysis.jpeg_quality = 0;
    let result = CameraSession::new(Arc::new(FakeCameraProvider::new()), settings);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_recording_defaults_flow_into_configuration() {
    let mut settings = SessionConfig::default();
    settings.recording.enable_audio = false;
    settings.recording.default_quality = VideoQuality::Fhd;
    let session = CameraSession::new(Arc::new(FakeCameraProvider::new()), settings).unwrap();

    let config = session.default_configuration(vec![Sensor::back()]);
    assert!(!config.enable_audio_recording);
    assert_eq!(config.video_quality, VideoQuality::Fhd);
    session.shutdown().await.unwrap();
}

//! Session lifecycle tests against the in-memory provider
//!
//! Run with: cargo test --test session_lifecycle_test

use std::sync::Arc;
use std::time::Duration;

use crabcam_session::capability::{CapabilityDowngrade, MultiSensorPolicy};
use crabcam_session::config::{ExposureMapping, SessionConfig};
use crabcam_session::errors::{ProviderError, SessionError};
use crabcam_session::invariants::{contract_test, Invariant};
use crabcam_session::session::{BinderState, CameraSession, CaptureConfiguration, SessionEvent, UseCaseKind};
use crabcam_session::testing::{FakeCameraProvider, ProviderEvent};
use crabcam_session::types::{
    AnalysisFormat, AnalysisSettings, AspectRatio, CaptureMode, ExtensionMode, FlashMode, HardwareLevel,
    Rational, Sensor, SensorPosition, Size, StillFlash,
};

fn session_with(provider: &FakeCameraProvider, settings: SessionConfig) -> CameraSession {
    CameraSession::new(Arc::new(provider.clone()), settings).expect("session should start")
}

fn session(provider: &FakeCameraProvider) -> CameraSession {
    session_with(provider, SessionConfig::default())
}

fn dual() -> Vec<Sensor> {
    vec![Sensor::back(), Sensor::front()]
}

/// Every bind in the provider log is preceded by an unbind
fn assert_unbind_before_every_bind(events: &[ProviderEvent]) {
    let mut unbound = true;
    for event in events {
        match event {
            ProviderEvent::Unbind => unbound = true,
            ProviderEvent::Bind { .. } => {
                assert!(unbound, "bind without a preceding unbind: {:?}", events);
                unbound = false;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_single_binding_across_reconfigurations() {
    let provider = FakeCameraProvider::new();
    let session = session(&provider);

    session
        .configure_session(CaptureConfiguration::new(dual()).with_flash_mode(FlashMode::Always))
        .await
        .unwrap();
    session.set_aspect_ratio(AspectRatio::Ratio16x9).await.unwrap();
    session.set_capture_mode(CaptureMode::Video).await.unwrap();
    session.set_sensors(vec![Sensor::front()]).await.unwrap();
    session
        .setup_analysis(AnalysisFormat::Nv21, 640, None, true)
        .await
        .unwrap();
    session.stop_analysis().await.unwrap();

    assert_eq!(provider.max_active_bindings(), 1);
    assert_eq!(provider.active_bindings(), 1);
    assert_eq!(provider.bind_count(), 6);
    assert_unbind_before_every_bind(&provider.events());
    assert_eq!(session.state().await.unwrap(), BinderState::Bound);

    contract_test(
        "single_binding",
        &[
            Invariant::SingleBinding,
            Invariant::UnbindBeforeBind,
            Invariant::AnalysisOnPrimaryOnly,
            Invariant::FlashOnPrimaryOnly,
        ],
    );
}

#[tokio::test]
async fn test_rapid_reconfiguration_ends_on_last_request() {
    let provider = FakeCameraProvider::new().with_bind_delay(Duration::from_millis(40));
    let session = Arc::new(session(&provider));
    session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.set_aspect_ratio(AspectRatio::Ratio16x9).await })
    };
    let second = {
        let session = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            session.set_aspect_ratio(AspectRatio::Ratio4x3).await
        })
    };
    let third = {
        let session = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.set_aspect_ratio(AspectRatio::Ratio16x9).await
        })
    };
    let fourth = {
        let session = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            session.set_aspect_ratio(AspectRatio::Ratio4x3).await
        })
    };

    for result in futures::future::join_all([first, second, third, fourth]).await {
        tokio_test::assert_ok!(result.unwrap());
    }

    let last = provider.last_bind().unwrap();
    assert_eq!(last[0].viewport, Rational::new(3, 4));
    assert_eq!(provider.active_bindings(), 1);
    assert_eq!(provider.max_active_bindings(), 1);
    // the later requests queued behind an in-progress bind are folded together
    assert!(provider.bind_count() < 5, "binds: {}", provider.bind_count());
    let config = session.configuration().await.unwrap().unwrap();
    assert_eq!(config.aspect_ratio, AspectRatio::Ratio4x3);
}

#[tokio::test]
async fn test_multi_sensor_downgrade_is_reported() {
    let provider = FakeCameraProvider::new().with_concurrent_support(false);
    let session = session(&provider);
    let mut events = session.subscribe();

    let outcome = session
        .configure_session(CaptureConfiguration::new(dual()))
        .await
        .unwrap();
    assert_eq!(outcome.sensors, vec![Sensor::back()]);
    assert_eq!(
        outcome.downgrades,
        vec![CapabilityDowngrade::ConcurrentCamerasUnsupported { requested: 2 }]
    );

    let mut saw_downgrade = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::CapabilityDowngrade { .. }) {
            saw_downgrade = true;
        }
    }
    assert!(saw_downgrade);

    // the same input downgrades the same way every time
    let again = session.set_aspect_ratio(AspectRatio::Ratio16x9).await.unwrap();
    assert_eq!(again.sensors, outcome.sensors);
    assert_eq!(again.downgrades, outcome.downgrades);
}

#[tokio::test]
async fn test_multi_sensor_reject_policy() {
    let provider = FakeCameraProvider::new().with_concurrent_support(false);
    let mut settings = SessionConfig::default();
    settings.capabilities.multi_sensor_policy = MultiSensorPolicy::Reject;
    let session = session_with(&provider, settings);

    let result = session.configure_session(CaptureConfiguration::new(dual())).await;
    assert!(matches!(result, Err(SessionError::Configuration(_))));
    assert_eq!(provider.bind_count(), 0);
}

#[tokio::test]
async fn test_video_with_analysis_ceiling() {
    let provider = FakeCameraProvider::new().with_hardware_level(SensorPosition::Back, HardwareLevel::Limited);
    let session = session(&provider);
    assert!(!session.is_video_recording_and_analysis_supported(SensorPosition::Back));
    assert!(session.is_video_recording_and_analysis_supported(SensorPosition::Front));

    let outcome = session
        .configure_session(
            CaptureConfiguration::new(vec![Sensor::back()])
                .with_capture_mode(CaptureMode::Video)
                .with_analysis(AnalysisSettings::new(AnalysisFormat::Nv21)),
        )
        .await
        .unwrap();
    assert!(outcome.use_cases[0].contains(&UseCaseKind::VideoCapture));
    assert!(!outcome.use_cases[0].contains(&UseCaseKind::Analysis));
    assert!(matches!(
        outcome.downgrades.as_slice(),
        [CapabilityDowngrade::AnalysisUnsupportedWithVideo { .. }]
    ));
}

#[tokio::test]
async fn test_flash_scoped_to_primary_sensor() {
    let provider = FakeCameraProvider::new();
    let session = session(&provider);
    session
        .configure_session(CaptureConfiguration::new(dual()).with_flash_mode(FlashMode::On))
        .await
        .unwrap();

    let bound = provider.last_bind().unwrap();
    assert_eq!(bound.len(), 2);
    assert_eq!(bound[0].still_flash, Some(StillFlash::On));
    assert_eq!(bound[1].still_flash, Some(StillFlash::Off));
}

#[tokio::test]
async fn test_analysis_scoped_to_primary_sensor() {
    let provider = FakeCameraProvider::new();
    let session = session(&provider);
    let outcome = session
        .configure_session(
            CaptureConfiguration::new(dual()).with_analysis(AnalysisSettings::new(AnalysisFormat::Jpeg)),
        )
        .await
        .unwrap();
    assert!(outcome.use_cases[0].contains(&UseCaseKind::Analysis));
    assert!(!outcome.use_cases[1].contains(&UseCaseKind::Analysis));
}

#[tokio::test]
async fn test_analysis_only_mode_binds_analysis_alone() {
    let provider = FakeCameraProvider::new();
    let session = session(&provider);
    let outcome = session
        .configure_session(
            CaptureConfiguration::new(vec![Sensor::back()])
                .with_capture_mode(CaptureMode::AnalysisOnly)
                .with_analysis(AnalysisSettings::new(AnalysisFormat::Nv21)),
        )
        .await
        .unwrap();
    assert_eq!(outcome.use_cases[0], vec![UseCaseKind::Analysis]);
    assert!(provider.has_frame_sink());
}

#[tokio::test]
async fn test_bind_failure_leaves_session_unbound() {
    let provider = FakeCameraProvider::new();
    let session = session(&provider);
    let mut events = session.subscribe();
    session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();

    provider.fail_next_bind(ProviderError::Disconnected("camera unplugged".to_string()));
    let result = session.set_aspect_ratio(AspectRatio::Ratio16x9).await;
    assert!(matches!(result, Err(SessionError::BindFailure(_))));
    assert_eq!(session.state().await.unwrap(), BinderState::Unbound);
    assert_eq!(provider.active_bindings(), 0);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::BindFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    // configuration was kept and the next change binds normally
    let outcome = session.set_aspect_ratio(AspectRatio::Ratio4x3).await.unwrap();
    assert_eq!(outcome.sensors, vec![Sensor::back()]);
    assert_eq!(session.state().await.unwrap(), BinderState::Bound);

    contract_test("bind_failure", &[Invariant::FailedBindLeavesUnbound]);
}

#[tokio::test]
async fn test_duplicate_or_unknown_sensors_never_bind() {
    let provider = FakeCameraProvider::new();
    let session = session(&provider);

    let result = session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back(), Sensor::back()]))
        .await;
    assert!(matches!(result, Err(SessionError::Configuration(_))));

    let result = session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back().with_device_id("7")]))
        .await;
    assert!(matches!(result, Err(SessionError::Configuration(_))));
    assert_eq!(provider.bind_count(), 0);

    session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();
    assert!(matches!(
        session.set_sensors(vec![Sensor::front(), Sensor::front()]).await,
        Err(SessionError::Configuration(_))
    ));
    assert_eq!(provider.bind_count(), 1);
    assert_eq!(session.state().await.unwrap(), BinderState::Bound);

    // capture cannot target one device twice either
    let dir = std::env::temp_dir();
    assert!(matches!(
        session
            .take_photo(
                vec![Sensor::back(), Sensor::back()],
                vec![dir.join("dup_a.jpg"), dir.join("dup_b.jpg")],
            )
            .await,
        Err(SessionError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_zoom_applied_after_bind() {
    let provider = FakeCameraProvider::new();
    let session = session(&provider);
    session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]).with_zoom(0.5))
        .await
        .unwrap();
    // any later round trip runs after the deferred zoom
    session.state().await.unwrap();

    let events = provider.events();
    let bind = events
        .iter()
        .position(|e| matches!(e, ProviderEvent::Bind { .. }))
        .unwrap();
    let zoom = events
        .iter()
        .position(|e| matches!(e, ProviderEvent::Zoom { .. }))
        .unwrap();
    assert!(zoom > bind);
    assert_eq!(provider.zoom_linear(SensorPosition::Back), Some(0.5));
}

#[tokio::test]
async fn test_zoom_and_range_queries() {
    let provider = FakeCameraProvider::new().with_zoom_range(1.0, 5.0);
    let session = session(&provider);
    assert!(session.min_zoom().await.is_err());

    session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();
    assert_eq!(session.min_zoom().await.unwrap(), 1.0);
    assert_eq!(session.max_zoom().await.unwrap(), 5.0);
    assert_eq!(session.linear_to_ratio(0.5).await.unwrap(), 3.0);

    session.set_zoom(0.25).await.unwrap();
    assert_eq!(provider.zoom_linear(SensorPosition::Back), Some(0.25));
    assert!(session.set_zoom(1.5).await.is_err());
    assert_eq!(provider.bind_count(), 1);
}

#[tokio::test]
async fn test_exposure_mappings() {
    let provider = FakeCameraProvider::new().with_exposure_range(-12, 12);
    let session = session(&provider);
    session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();
    assert_eq!(session.set_exposure_correction(0.0).await.unwrap(), -12);
    assert_eq!(session.set_exposure_correction(1.0).await.unwrap(), 12);
    assert_eq!(session.set_exposure_correction(0.5).await.unwrap(), 0);
    assert_eq!(provider.exposure_index(SensorPosition::Back), Some(0));
    assert!(session.set_exposure_correction(2.0).await.is_err());

    let mut settings = SessionConfig::default();
    settings.exposure.mapping = ExposureMapping::Centered;
    let provider = FakeCameraProvider::new().with_exposure_range(-12, 12);
    let centered = session_with(&provider, settings);
    centered
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();
    let low = centered.set_exposure_correction(0.0).await.unwrap();
    let high = centered.set_exposure_correction(1.0).await.unwrap();
    assert!(low >= -12 && high <= 12 && low < high);
}

#[tokio::test]
async fn test_photo_size_oriented_to_sensor() {
    let provider = FakeCameraProvider::new().with_sensor_rotation(90);
    let session = session(&provider);
    session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();
    session.set_photo_size(Size::new(1920, 1080)).await.unwrap();
    let config = session.configuration().await.unwrap().unwrap();
    assert_eq!(config.photo_size, Some(Size::new(1080, 1920)));
}

#[tokio::test]
async fn test_unavailable_extension_is_dropped() {
    let provider = FakeCameraProvider::new().with_extension(ExtensionMode::Night);
    let session = session(&provider);
    assert!(session.is_extension_available(ExtensionMode::Night, SensorPosition::Back));
    assert!(!session.is_extension_available(ExtensionMode::Bokeh, SensorPosition::Back));

    session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();
    session.set_extension_mode(Some(ExtensionMode::Night)).await.unwrap();
    assert_eq!(provider.last_bind().unwrap()[0].extension, Some(ExtensionMode::Night));

    let outcome = session.set_extension_mode(Some(ExtensionMode::Bokeh)).await.unwrap();
    assert_eq!(provider.last_bind().unwrap()[0].extension, None);
    assert_eq!(
        outcome.downgrades,
        vec![CapabilityDowngrade::ExtensionUnavailable {
            mode: ExtensionMode::Bokeh
        }]
    );
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let first_provider = FakeCameraProvider::new();
    let second_provider = FakeCameraProvider::new();
    let first = session(&first_provider);
    let second = session(&second_provider);
    assert_ne!(first.id(), second.id());

    first
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();
    assert_eq!(second.state().await.unwrap(), BinderState::Unbound);
    assert_eq!(second_provider.bind_count(), 0);

    first.shutdown().await.unwrap();
    second
        .configure_session(CaptureConfiguration::new(vec![Sensor::front()]))
        .await
        .unwrap();
    assert_eq!(second.state().await.unwrap(), BinderState::Bound);
}

#[tokio::test]
async fn test_preview_sizes_from_bound_camera() {
    let provider = FakeCameraProvider::new();
    let session = session(&provider);
    assert!(session.available_preview_sizes().await.is_err());
    session
        .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
        .await
        .unwrap();
    let sizes = session.available_preview_sizes().await.unwrap();
    assert!(sizes.contains(&Size::new(1280, 720)));
}

//! CrabCam Session: camera session lifecycle and analysis pipeline
//!
//! This crate keeps exactly one live camera binding per session, derived
//! from a declarative [`CaptureConfiguration`], and feeds an analysis
//! consumer with converted frames under strict backpressure.
//!
//! # Features
//! - Serialized reconfiguration with rapid changes coalesced into one rebind
//! - Capability downgrades reported instead of failing the bind
//! - NV21, JPEG and RGBA analysis output with one frame in flight
//! - Optional Tauri command surface (`plugin` feature)
//!
//! # Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use crabcam_session::{CameraSession, CaptureConfiguration, Sensor};
//!
//! let session = CameraSession::with_defaults(Arc::new(my_provider))?;
//! session
//!     .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
//!     .await?;
//! ```
//!
//! With the `plugin` feature, register the commands in a Tauri app:
//! ```rust,ignore
//! tauri::Builder::default()
//!     .plugin(crabcam_session::init(Arc::new(my_provider)))
//!     .run(tauri::generate_context!())
//!     .expect("error while running tauri application");
//! ```
pub mod analysis;
pub mod capability;
#[cfg(feature = "plugin")]
pub mod commands;
pub mod config;
pub mod errors;
pub mod invariants;
pub mod platform;
pub mod session;
pub mod timing;
pub mod types;

// Testing utilities - in-memory provider and synthetic frames
pub mod testing;

// Re-exports for convenience
pub use analysis::{AnalysisEvent, AnalysisImage, AnalysisPipeline, AnalysisReceiver, Frame, FrameFormatConverter};
pub use capability::{CapabilityDowngrade, CapabilityProbe, MultiSensorPolicy};
pub use config::SessionConfig;
pub use errors::{ProviderError, SessionError};
pub use platform::{BoundCamera, CameraProvider, FrameSink};
pub use session::{BindOutcome, BinderState, CameraSession, CaptureConfiguration, SessionEvent};
pub use types::{
    AnalysisFormat, AnalysisSettings, AspectRatio, CaptureMode, FlashMode, Sensor, SensorPosition, Size,
};

#[cfg(feature = "plugin")]
use tauri::{
    plugin::{Builder, TauriPlugin},
    Manager, Runtime,
};

/// Initialize the plugin with all session commands.
///
/// Sessions created through the commands bind against `provider`, loading
/// their settings from the default config file when present.
#[cfg(feature = "plugin")]
pub fn init<R: Runtime>(provider: std::sync::Arc<dyn CameraProvider>) -> TauriPlugin<R> {
    Builder::new("crabcam-session")
        .invoke_handler(tauri::generate_handler![
            // Lifecycle
            commands::session::create_session,
            commands::session::close_session,
            commands::session::get_session_state,
            commands::session::configure_session,
            commands::session::get_configuration,
            // Configuration mutators
            commands::session::set_sensors,
            commands::session::set_capture_mode,
            commands::session::set_aspect_ratio,
            commands::session::set_flash_mode,
            commands::session::set_zoom,
            commands::session::set_photo_size,
            commands::session::set_preview_size,
            commands::session::set_mirror_front_camera,
            commands::session::set_recording_audio_mode,
            commands::session::set_extension_mode,
            // Device controls
            commands::session::set_exposure_correction,
            commands::session::focus_on_point,
            commands::session::get_zoom_range,
            commands::session::get_available_preview_sizes,
            // Capture
            commands::session::take_photo,
            commands::session::start_recording,
            commands::session::pause_recording,
            commands::session::resume_recording,
            commands::session::stop_recording,
            // Analysis
            commands::session::setup_analysis,
            commands::session::start_analysis,
            commands::session::stop_analysis,
            commands::session::poll_analysis_frame,
            commands::session::received_frame,
            // Capabilities
            commands::session::is_multi_cam_supported,
            commands::session::is_video_recording_and_analysis_supported,
            commands::session::is_extension_available,
        ])
        .setup(move |app, _api| {
            let settings = SessionConfig::load_or_default();
            app.manage(commands::session::SessionRegistry::new(provider, settings));
            Ok(())
        })
        .build()
}

/// Initialize logging for the session layer
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcam_session=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        plugin: cfg!(feature = "plugin"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Whether the Tauri command surface is compiled in
    pub plugin: bool,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabcam-session");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }
}

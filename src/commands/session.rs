use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tauri::{command, State};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::analysis::{AnalysisEvent, AnalysisReceiver};
use crate::config::SessionConfig;
use crate::platform::CameraProvider;
use crate::session::{BindOutcome, BinderState, CameraSession, CaptureConfiguration};
use crate::types::{
    AnalysisFormat, AspectRatio, CaptureMode, ExtensionMode, FlashMode, Sensor, SensorPosition, Size,
};

struct SessionEntry {
    session: Arc<CameraSession>,
    analysis: Arc<Mutex<AnalysisReceiver>>,
}

/// Sessions created through the command surface, keyed by session id
pub struct SessionRegistry {
    provider: Arc<dyn CameraProvider>,
    settings: SessionConfig,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn CameraProvider>, settings: SessionConfig) -> Self {
        Self {
            provider,
            settings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, id: &str) -> Result<Arc<CameraSession>, String> {
        let id = parse_id(id)?;
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| format!("Unknown session: {}", id))
    }

    async fn analysis(&self, id: &str) -> Result<Arc<Mutex<AnalysisReceiver>>, String> {
        let id = parse_id(id)?;
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.analysis.clone())
            .ok_or_else(|| format!("Unknown session: {}", id))
    }
}

fn parse_id(id: &str) -> Result<Uuid, String> {
    Uuid::parse_str(id).map_err(|e| format!("Invalid session id {}: {}", id, e))
}

/// Zoom limits of the bound primary sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoomRange {
    pub min_ratio: f32,
    pub max_ratio: f32,
    pub linear: f32,
}

/// Per-sensor photo result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoResult {
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Create a session and attach its analysis consumer
#[command]
pub async fn create_session(registry: State<'_, SessionRegistry>) -> Result<String, String> {
    let session = CameraSession::new(registry.provider.clone(), registry.settings.clone())
        .map_err(|e| format!("Failed to create session: {}", e))?;
    let analysis = session.attach_analysis_consumer();
    let id = session.id();
    registry.sessions.write().await.insert(
        id,
        SessionEntry {
            session: Arc::new(session),
            analysis: Arc::new(Mutex::new(analysis)),
        },
    );
    log::info!("Created session {}", id);
    Ok(id.to_string())
}

#[command]
pub async fn close_session(registry: State<'_, SessionRegistry>, session_id: String) -> Result<(), String> {
    let id = parse_id(&session_id)?;
    let entry = registry.sessions.write().await.remove(&id);
    match entry {
        Some(entry) => entry
            .session
            .shutdown()
            .await
            .map_err(|e| format!("Failed to close session: {}", e)),
        None => Err(format!("Unknown session: {}", id)),
    }
}

#[command]
pub async fn get_session_state(
    registry: State<'_, SessionRegistry>,
    session_id: String,
) -> Result<BinderState, String> {
    let session = registry.get(&session_id).await?;
    session.state().await.map_err(|e| e.to_string())
}

/// Replace the configuration and bind it
#[command]
pub async fn configure_session(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    configuration: CaptureConfiguration,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    match session.configure_session(configuration).await {
        Ok(outcome) => {
            log::info!(
                "Session {} bound {} sensor(s) ({} downgrade(s))",
                session_id,
                outcome.sensors.len(),
                outcome.downgrades.len()
            );
            Ok(outcome)
        }
        Err(e) => {
            log::error!("Failed to configure session {}: {}", session_id, e);
            Err(format!("Failed to configure session: {}", e))
        }
    }
}

#[command]
pub async fn get_configuration(
    registry: State<'_, SessionRegistry>,
    session_id: String,
) -> Result<Option<CaptureConfiguration>, String> {
    let session = registry.get(&session_id).await?;
    session.configuration().await.map_err(|e| e.to_string())
}

#[command]
pub async fn set_sensors(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    sensors: Vec<Sensor>,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    session
        .set_sensors(sensors)
        .await
        .map_err(|e| format!("Failed to set sensors: {}", e))
}

#[command]
pub async fn set_capture_mode(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    mode: CaptureMode,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    session
        .set_capture_mode(mode)
        .await
        .map_err(|e| format!("Failed to set capture mode: {}", e))
}

#[command]
pub async fn set_aspect_ratio(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    ratio: AspectRatio,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    session
        .set_aspect_ratio(ratio)
        .await
        .map_err(|e| format!("Failed to set aspect ratio: {}", e))
}

#[command]
pub async fn set_flash_mode(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    mode: FlashMode,
) -> Result<Option<BindOutcome>, String> {
    let session = registry.get(&session_id).await?;
    session
        .set_flash_mode(mode)
        .await
        .map_err(|e| format!("Failed to set flash mode: {}", e))
}

#[command]
pub async fn set_zoom(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    level: f32,
) -> Result<(), String> {
    let session = registry.get(&session_id).await?;
    session
        .set_zoom(level)
        .await
        .map_err(|e| format!("Failed to set zoom: {}", e))
}

#[command]
pub async fn set_photo_size(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    width: u32,
    height: u32,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    session
        .set_photo_size(Size::new(width, height))
        .await
        .map_err(|e| format!("Failed to set photo size: {}", e))
}

#[command]
pub async fn set_preview_size(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    width: u32,
    height: u32,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    session
        .set_preview_size(Size::new(width, height))
        .await
        .map_err(|e| format!("Failed to set preview size: {}", e))
}

#[command]
pub async fn set_mirror_front_camera(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    mirror: bool,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    session
        .set_mirror_front_camera(mirror)
        .await
        .map_err(|e| format!("Failed to set mirroring: {}", e))
}

#[command]
pub async fn set_recording_audio_mode(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    enabled: bool,
) -> Result<(), String> {
    let session = registry.get(&session_id).await?;
    session
        .set_recording_audio_mode(enabled)
        .await
        .map_err(|e| format!("Failed to set audio mode: {}", e))
}

#[command]
pub async fn set_extension_mode(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    mode: Option<ExtensionMode>,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    session
        .set_extension_mode(mode)
        .await
        .map_err(|e| format!("Failed to set extension mode: {}", e))
}

/// Returns the exposure index that was applied
#[command]
pub async fn set_exposure_correction(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    brightness: f32,
) -> Result<i32, String> {
    let session = registry.get(&session_id).await?;
    session
        .set_exposure_correction(brightness)
        .await
        .map_err(|e| format!("Failed to set exposure: {}", e))
}

#[command]
pub async fn focus_on_point(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    preview_width: u32,
    preview_height: u32,
    x: f32,
    y: f32,
    auto_cancel_ms: Option<i64>,
) -> Result<(), String> {
    let session = registry.get(&session_id).await?;
    session
        .focus_on_point(Size::new(preview_width, preview_height), x, y, auto_cancel_ms)
        .await
        .map_err(|e| format!("Failed to focus: {}", e))
}

#[command]
pub async fn get_zoom_range(
    registry: State<'_, SessionRegistry>,
    session_id: String,
) -> Result<ZoomRange, String> {
    let session = registry.get(&session_id).await?;
    let state = session.zoom_state().await.map_err(|e| e.to_string())?;
    Ok(ZoomRange {
        min_ratio: state.min_ratio,
        max_ratio: state.max_ratio,
        linear: state.linear,
    })
}

#[command]
pub async fn get_available_preview_sizes(
    registry: State<'_, SessionRegistry>,
    session_id: String,
) -> Result<Vec<Size>, String> {
    let session = registry.get(&session_id).await?;
    session
        .available_preview_sizes()
        .await
        .map_err(|e| e.to_string())
}

#[command]
pub async fn take_photo(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    sensors: Vec<Sensor>,
    paths: Vec<PathBuf>,
) -> Result<Vec<PhotoResult>, String> {
    let session = registry.get(&session_id).await?;
    let results = session
        .take_photo(sensors, paths)
        .await
        .map_err(|e| format!("Failed to take photo: {}", e))?;
    Ok(results
        .into_iter()
        .map(|result| match result {
            Ok(path) => PhotoResult {
                path: Some(path),
                error: None,
            },
            Err(e) => PhotoResult {
                path: None,
                error: Some(e.to_string()),
            },
        })
        .collect())
}

/// Returns the recording ids
#[command]
pub async fn start_recording(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    sensors: Vec<Sensor>,
    paths: Vec<PathBuf>,
) -> Result<Vec<String>, String> {
    let session = registry.get(&session_id).await?;
    let infos = session
        .start_recording(sensors, paths)
        .await
        .map_err(|e| format!("Failed to start recording: {}", e))?;
    Ok(infos.into_iter().map(|info| info.id.to_string()).collect())
}

#[command]
pub async fn pause_recording(registry: State<'_, SessionRegistry>, session_id: String) -> Result<(), String> {
    let session = registry.get(&session_id).await?;
    session
        .pause_recording()
        .await
        .map_err(|e| format!("Failed to pause recording: {}", e))
}

#[command]
pub async fn resume_recording(registry: State<'_, SessionRegistry>, session_id: String) -> Result<(), String> {
    let session = registry.get(&session_id).await?;
    session
        .resume_recording()
        .await
        .map_err(|e| format!("Failed to resume recording: {}", e))
}

#[command]
pub async fn stop_recording(
    registry: State<'_, SessionRegistry>,
    session_id: String,
) -> Result<Vec<PathBuf>, String> {
    let session = registry.get(&session_id).await?;
    session
        .stop_recording()
        .await
        .map_err(|e| format!("Failed to stop recording: {}", e))
}

#[command]
pub async fn setup_analysis(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    format: AnalysisFormat,
    width: i64,
    max_fps: Option<f64>,
    auto_start: bool,
) -> Result<Option<BindOutcome>, String> {
    let session = registry.get(&session_id).await?;
    session
        .setup_analysis(format, width, max_fps, auto_start)
        .await
        .map_err(|e| format!("Failed to set up analysis: {}", e))
}

#[command]
pub async fn start_analysis(
    registry: State<'_, SessionRegistry>,
    session_id: String,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    session
        .start_analysis()
        .await
        .map_err(|e| format!("Failed to start analysis: {}", e))
}

#[command]
pub async fn stop_analysis(
    registry: State<'_, SessionRegistry>,
    session_id: String,
) -> Result<BindOutcome, String> {
    let session = registry.get(&session_id).await?;
    session
        .stop_analysis()
        .await
        .map_err(|e| format!("Failed to stop analysis: {}", e))
}

/// Poll for the next analysis event (non-blocking)
#[command]
pub async fn poll_analysis_frame(
    registry: State<'_, SessionRegistry>,
    session_id: String,
) -> Result<Option<AnalysisEvent>, String> {
    let analysis = registry.analysis(&session_id).await?;
    let mut receiver = analysis.lock().await;
    Ok(receiver.try_recv())
}

/// Acknowledge the last analysis frame so the next one can be delivered
#[command]
pub async fn received_frame(registry: State<'_, SessionRegistry>, session_id: String) -> Result<(), String> {
    let analysis = registry.analysis(&session_id).await?;
    analysis.lock().await.ack();
    Ok(())
}

#[command]
pub async fn is_multi_cam_supported(
    registry: State<'_, SessionRegistry>,
    session_id: String,
) -> Result<bool, String> {
    Ok(registry.get(&session_id).await?.is_multi_cam_supported())
}

#[command]
pub async fn is_video_recording_and_analysis_supported(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    position: SensorPosition,
) -> Result<bool, String> {
    Ok(registry
        .get(&session_id)
        .await?
        .is_video_recording_and_analysis_supported(position))
}

#[command]
pub async fn is_extension_available(
    registry: State<'_, SessionRegistry>,
    session_id: String,
    mode: ExtensionMode,
    position: SensorPosition,
) -> Result<bool, String> {
    Ok(registry
        .get(&session_id)
        .await?
        .is_extension_available(mode, position))
}

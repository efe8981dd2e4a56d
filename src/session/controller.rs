//! Session execution context and public operations
//!
//! All configuration state and every bind/unbind lives on one dedicated
//! thread. Public methods marshal onto it over a command channel and await
//! the reply. Configuration changes queued back to back are folded into a
//! single rebind (last writer wins) and every caller gets that rebind's
//! result.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use super::binder::{BindOutcome, BinderPolicy, BinderState, SessionBinder};
use super::configuration::{first_duplicate, oriented_size, CaptureConfiguration};
use super::events::{SessionEvent, EVENT_CAPACITY};
use super::recording::{await_capture_ack, ensure_parent_dir, PendingStop, RecordingInfo, RecordingSet};
use super::use_cases::UseCaseKind;
use crate::analysis::convert::FrameFormatConverter;
use crate::analysis::pipeline::{AnalysisPipeline, AnalysisReceiver, AnalysisStats};
use crate::capability::CapabilityProbe;
use crate::config::SessionConfig;
use crate::errors::{recover_lock, SessionError};
use crate::platform::{BoundCamera, CameraProvider, CaptureAck, MeteringPoint, PhotoRequest, ZoomState};
use crate::types::{
    AnalysisFormat, AnalysisSettings, AspectRatio, CaptureMode, ExtensionMode, FlashMode, Sensor,
    SensorPosition, Size, VideoQuality,
};

/// Auto-cancel applied to a focus request that does not specify one
pub const DEFAULT_FOCUS_AUTO_CANCEL: Duration = Duration::from_millis(2500);

/// A change to the desired configuration that requires a rebind
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    Replace(Box<CaptureConfiguration>),
    Sensors(Vec<Sensor>),
    CaptureMode(CaptureMode),
    AspectRatio(AspectRatio),
    StartAnalysis,
    StopAnalysis,
    PhotoSize(Size),
    PreviewSize(Size),
    MirrorFrontCamera(bool),
    Extension(Option<ExtensionMode>),
    VideoQuality(VideoQuality),
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    Reconfigure {
        change: ConfigChange,
        reply: Reply<BindOutcome>,
    },
    Exec(Box<dyn FnOnce(&mut SessionCore) + Send>),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

fn not_configured() -> SessionError {
    SessionError::configuration("session has not been configured")
}

fn not_bound() -> SessionError {
    SessionError::configuration("session is not bound")
}

fn configured(candidate: &mut Option<CaptureConfiguration>) -> Result<&mut CaptureConfiguration, SessionError> {
    candidate.as_mut().ok_or_else(not_configured)
}

/// State owned by the session thread
struct SessionCore {
    config: Option<CaptureConfiguration>,
    binder: SessionBinder,
    recordings: RecordingSet,
    /// Settings from the last analysis setup, restored by `StartAnalysis`
    analysis_setup: Option<AnalysisSettings>,
    settings: SessionConfig,
    analysis: Arc<AnalysisPipeline>,
    events: broadcast::Sender<SessionEvent>,
    zoom_pending: bool,
}

impl SessionCore {
    fn default_analysis(&self) -> AnalysisSettings {
        AnalysisSettings::new(self.settings.analysis.default_format)
    }

    fn check_sensors(&self, config: &CaptureConfiguration) -> Result<(), SessionError> {
        let probe = self.binder.probe();
        match config.sensors.iter().find(|sensor| !probe.has_sensor(sensor)) {
            Some(missing) => Err(SessionError::configuration(format!(
                "no {:?} sensor available",
                missing.position
            ))),
            None => Ok(()),
        }
    }

    fn primary(&self) -> Result<Arc<dyn BoundCamera>, SessionError> {
        self.binder.primary_camera().ok_or_else(not_bound)
    }

    fn apply_change(
        &mut self,
        candidate: &mut Option<CaptureConfiguration>,
        change: ConfigChange,
    ) -> Result<(), SessionError> {
        let rotation = self
            .binder
            .primary_camera()
            .map(|c| c.sensor_rotation_degrees())
            .unwrap_or(0);

        match change {
            ConfigChange::Replace(config) => *candidate = Some(*config),
            ConfigChange::Sensors(sensors) => configured(candidate)?.sensors = sensors,
            ConfigChange::CaptureMode(mode) => configured(candidate)?.capture_mode = mode,
            ConfigChange::AspectRatio(ratio) => configured(candidate)?.aspect_ratio = ratio,
            ConfigChange::StartAnalysis => {
                let settings = self.analysis_setup.unwrap_or_else(|| self.default_analysis());
                configured(candidate)?.analysis = Some(settings);
            }
            ConfigChange::StopAnalysis => configured(candidate)?.analysis = None,
            ConfigChange::PhotoSize(size) => {
                configured(candidate)?.photo_size = Some(oriented_size(size, rotation))
            }
            ConfigChange::PreviewSize(size) => {
                configured(candidate)?.preview_size = Some(oriented_size(size, rotation))
            }
            ConfigChange::MirrorFrontCamera(mirror) => {
                configured(candidate)?.mirror_front_camera = mirror
            }
            ConfigChange::Extension(extension) => configured(candidate)?.extension = extension,
            ConfigChange::VideoQuality(quality) => configured(candidate)?.video_quality = quality,
        }
        Ok(())
    }

    /// Fold a batch of changes into one rebind
    fn reconfigure(&mut self, batch: Vec<(ConfigChange, Reply<BindOutcome>)>) {
        let mut candidate = self.config.clone();
        let mut accepted = Vec::with_capacity(batch.len());

        for (change, reply) in batch {
            let mut next = candidate.clone();
            log::debug!("Applying {:?}", change);
            let applied = self.apply_change(&mut next, change).and_then(|_| match &next {
                Some(config) => config.validate().and_then(|_| self.check_sensors(config)),
                None => Err(not_configured()),
            });
            match applied {
                Ok(()) => {
                    candidate = next;
                    accepted.push(reply);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            }
        }

        if accepted.is_empty() {
            return;
        }
        if accepted.len() > 1 {
            log::debug!("Coalesced {} configuration changes into one rebind", accepted.len());
        }

        let result = match candidate {
            Some(config) => {
                let result = self.rebind(&config);
                self.config = Some(config);
                result
            }
            None => Err(not_configured()),
        };
        for reply in accepted {
            let _ = reply.send(result.clone());
        }
    }

    /// Stop running recordings under one stop deadline before their binding goes away
    fn finish_recordings(&mut self) {
        if !self.recordings.is_recording() {
            return;
        }
        let pending = self.recordings.stop_all();
        log::warn!("Stopping {} recording(s) before rebinding", pending.len());
        let deadline = Instant::now() + self.settings.recording.stop_timeout();
        for stop in pending {
            let recording_id = stop.info.id;
            let result = stop.wait_blocking(deadline.saturating_duration_since(Instant::now()));
            if let Err(e) = &result {
                log::warn!("Recording {} did not stop cleanly: {}", recording_id, e);
            }
            let _ = self.events.send(SessionEvent::RecordingStopped {
                recording_id,
                success: result.is_ok(),
            });
        }
    }

    fn rebind(&mut self, config: &CaptureConfiguration) -> Result<BindOutcome, SessionError> {
        self.finish_recordings();
        let result = self.binder.rebind(config);
        if result.is_ok() {
            self.zoom_pending = config.zoom > 0.0;
        }
        result
    }

    fn rebind_current(&mut self) -> Result<BindOutcome, SessionError> {
        let config = self.config.clone().ok_or_else(not_configured)?;
        self.rebind(&config)
    }

    /// Zoom only exists on a bound device, so it is applied on the turn after the bind
    fn apply_pending_zoom(&mut self) {
        if !std::mem::take(&mut self.zoom_pending) {
            return;
        }
        let (Some(config), Some(camera)) = (&self.config, self.binder.primary_camera()) else {
            return;
        };
        if let Err(e) = camera.set_linear_zoom(config.zoom) {
            log::warn!("Failed to apply zoom {}: {}", config.zoom, e);
        }
    }

    fn set_flash_mode(&mut self, mode: FlashMode) -> Result<Option<BindOutcome>, SessionError> {
        let config = self.config.as_mut().ok_or_else(not_configured)?;
        let previous = config.flash_mode;
        config.flash_mode = mode;

        if self.binder.state() != BinderState::Bound {
            return Ok(None);
        }
        let still_flash_changed = config.capture_mode == CaptureMode::Photo
            && previous.still_flash() != mode.still_flash();
        if still_flash_changed {
            return self.rebind_current().map(Some);
        }

        let config = config.clone();
        self.binder.apply_torch(&config);
        Ok(None)
    }

    fn set_zoom(&mut self, level: f32) -> Result<(), SessionError> {
        if !level.is_finite() || !(0.0..=1.0).contains(&level) {
            return Err(SessionError::configuration(format!("zoom {} outside [0, 1]", level)));
        }
        let config = self.config.as_mut().ok_or_else(not_configured)?;
        config.zoom = level;
        if let Some(camera) = self.binder.primary_camera() {
            camera
                .set_linear_zoom(level)
                .map_err(|e| SessionError::CaptureFailure(format!("zoom failed: {}", e)))?;
        }
        Ok(())
    }

    fn setup_analysis(
        &mut self,
        settings: AnalysisSettings,
        auto_start: bool,
    ) -> Result<Option<BindOutcome>, SessionError> {
        self.analysis_setup = Some(settings);
        let Some(config) = self.config.as_mut() else {
            return Ok(None);
        };
        let wanted = if auto_start { Some(settings) } else { None };
        if config.analysis == wanted {
            return Ok(None);
        }
        let mut next = config.clone();
        next.analysis = wanted;
        next.validate()?;
        self.config = Some(next);
        self.rebind_current().map(Some)
    }

    fn set_exposure(&mut self, brightness: f32) -> Result<i32, SessionError> {
        if !brightness.is_finite() || !(0.0..=1.0).contains(&brightness) {
            return Err(SessionError::configuration(format!(
                "brightness {} outside [0, 1]",
                brightness
            )));
        }
        let camera = self.primary()?;
        let range = camera.exposure_state();
        let index = self
            .settings
            .exposure
            .mapping
            .index_for(brightness, range.min_index, range.max_index);
        camera
            .set_exposure_index(index)
            .map_err(|e| SessionError::CaptureFailure(format!("exposure failed: {}", e)))?;
        log::debug!("Exposure brightness {} -> index {}", brightness, index);
        Ok(index)
    }

    fn focus_on_point(
        &mut self,
        preview: Size,
        x: f32,
        y: f32,
        auto_cancel_ms: Option<i64>,
    ) -> Result<(), SessionError> {
        if preview.width == 0 || preview.height == 0 {
            return Err(SessionError::configuration("preview size must be non-empty"));
        }
        let point = MeteringPoint {
            x: (x / preview.width as f32).clamp(0.0, 1.0),
            y: (y / preview.height as f32).clamp(0.0, 1.0),
        };
        let auto_cancel = match auto_cancel_ms {
            None => Some(DEFAULT_FOCUS_AUTO_CANCEL),
            Some(ms) if ms <= 0 => None,
            Some(ms) => Some(Duration::from_millis(ms as u64)),
        };
        self.primary()?
            .start_focus_and_metering(point, auto_cancel)
            .map_err(|e| SessionError::CaptureFailure(format!("focus failed: {}", e)))
    }

    /// Bound cameras carrying `kind`, in binding order
    fn cameras_with(&self, kind: UseCaseKind) -> Result<Vec<Arc<dyn BoundCamera>>, SessionError> {
        let binding = self.binder.binding().ok_or_else(not_bound)?;
        Ok(binding
            .cameras()
            .iter()
            .zip(&binding.outcome.use_cases)
            .filter(|(_, kinds)| kinds.contains(&kind))
            .map(|(camera, _)| camera.clone())
            .collect())
    }

    /// Pair each requested sensor with its bound camera
    fn match_targets(
        &self,
        kind: UseCaseKind,
        sensors: Vec<Sensor>,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<(Arc<dyn BoundCamera>, PathBuf)>, SessionError> {
        if sensors.len() != paths.len() {
            return Err(SessionError::configuration(format!(
                "{} sensors but {} paths",
                sensors.len(),
                paths.len()
            )));
        }
        if let Some(duplicate) = first_duplicate(&sensors) {
            return Err(SessionError::configuration(format!(
                "{:?} sensor targeted more than once",
                duplicate.position
            )));
        }
        let cameras = self.cameras_with(kind)?;
        if sensors.len() != cameras.len() {
            return Err(SessionError::configuration(format!(
                "{} sensors requested but {} bound for {:?}",
                sensors.len(),
                cameras.len(),
                kind
            )));
        }

        let mut targets = Vec::with_capacity(sensors.len());
        for (sensor, path) in sensors.into_iter().zip(paths) {
            let camera = cameras
                .iter()
                .find(|c| c.sensor().matches(&sensor))
                .cloned()
                .ok_or_else(|| {
                    SessionError::configuration(format!("{:?} sensor is not bound", sensor.position))
                })?;
            targets.push((camera, path));
        }
        Ok(targets)
    }

    fn take_photo(
        &mut self,
        sensors: Vec<Sensor>,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<Result<CaptureAck, SessionError>>, SessionError> {
        let mirror = self
            .config
            .as_ref()
            .ok_or_else(not_configured)?
            .mirrors_photos();
        let targets = self.match_targets(UseCaseKind::StillCapture, sensors, paths)?;

        Ok(targets
            .into_iter()
            .map(|(camera, path)| {
                ensure_parent_dir(&path)?;
                camera
                    .take_picture(PhotoRequest {
                        path,
                        mirror_horizontally: mirror,
                    })
                    .map_err(|e| SessionError::CaptureFailure(format!("photo failed: {}", e)))
            })
            .collect())
    }

    fn start_recording(
        &mut self,
        sensors: Vec<Sensor>,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<RecordingInfo>, SessionError> {
        let with_audio = self
            .config
            .as_ref()
            .ok_or_else(not_configured)?
            .enable_audio_recording;
        let targets = self.match_targets(UseCaseKind::VideoCapture, sensors, paths)?;
        self.recordings.start(targets, with_audio)
    }

    fn stop_recording(&mut self) -> Result<Vec<PendingStop>, SessionError> {
        if !self.recordings.is_recording() {
            return Err(SessionError::configuration("no recording in progress"));
        }
        Ok(self.recordings.stop_all())
    }

    fn teardown(&mut self) {
        let released = self.recordings.release_all();
        if released > 0 {
            log::warn!("Released {} recording(s) at teardown", released);
        }
        self.binder.unbind();
        self.analysis.shutdown();
        log::info!("Session torn down");
    }
}

fn run(mut core: SessionCore, commands: Receiver<Command>) {
    let mut next: Option<Command> = None;
    loop {
        core.apply_pending_zoom();

        let command = match next.take() {
            Some(command) => command,
            None => match commands.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Reconfigure { change, reply } => {
                let mut batch = vec![(change, reply)];
                loop {
                    match commands.try_recv() {
                        Ok(Command::Reconfigure { change, reply }) => batch.push((change, reply)),
                        Ok(other) => {
                            next = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                core.reconfigure(batch);
            }
            Command::Exec(job) => job(&mut core),
            Command::Shutdown { reply } => {
                core.teardown();
                let _ = reply.send(());
                return;
            }
        }
    }
    core.teardown();
}

/// Handle to one camera session.
///
/// Sessions are independent: each owns its own thread, binding and analysis
/// pipeline. Dropping the handle tears the session down.
pub struct CameraSession {
    id: Uuid,
    commands: Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    analysis: Arc<AnalysisPipeline>,
    probe: CapabilityProbe,
    settings: SessionConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CameraSession {
    /// Start a session thread against `provider`
    pub fn new(provider: Arc<dyn CameraProvider>, settings: SessionConfig) -> Result<Self, SessionError> {
        settings.validate()?;

        let id = Uuid::new_v4();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let analysis = Arc::new(AnalysisPipeline::new(FrameFormatConverter::new(
            settings.analysis.jpeg_quality,
        ))?);
        analysis.set_event_sender(events.clone());

        let policy = BinderPolicy {
            multi_sensor: settings.capabilities.multi_sensor_policy,
            video_analysis_min_level: settings.capabilities.video_analysis_min_level,
            default_analysis_width: settings.analysis.default_width,
        };
        let binder = SessionBinder::new(provider.clone(), policy, analysis.clone(), events.clone());

        let core = SessionCore {
            config: None,
            binder,
            recordings: RecordingSet::new(),
            analysis_setup: None,
            settings: settings.clone(),
            analysis: analysis.clone(),
            events: events.clone(),
            zoom_pending: false,
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("crabcam-session".to_string())
            .spawn(move || run(core, rx))
            .map_err(|e| SessionError::Closed(format!("failed to spawn session thread: {}", e)))?;

        log::info!("Camera session {} started", id);
        Ok(Self {
            id,
            commands: tx,
            events,
            analysis,
            probe: CapabilityProbe::new(provider),
            settings,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn with_defaults(provider: Arc<dyn CameraProvider>) -> Result<Self, SessionError> {
        Self::new(provider, SessionConfig::default())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &SessionConfig {
        &self.settings
    }

    /// A configuration for `sensors` carrying this session's recording defaults
    pub fn default_configuration(&self, sensors: Vec<Sensor>) -> CaptureConfiguration {
        CaptureConfiguration::new(sensors)
            .with_audio(self.settings.recording.enable_audio)
            .with_video_quality(self.settings.recording.default_quality)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::closed())
    }

    async fn exec<T, F>(&self, job: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionCore) -> Result<T, SessionError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Exec(Box::new(move |core: &mut SessionCore| {
            let _ = tx.send(job(core));
        })))?;
        rx.await.map_err(|_| SessionError::closed())?
    }

    async fn reconfigure(&self, change: ConfigChange) -> Result<BindOutcome, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Reconfigure { change, reply: tx })?;
        rx.await.map_err(|_| SessionError::closed())?
    }

    /// Replace the whole configuration and bind it. A non-zero zoom is applied after the bind.
    pub async fn configure_session(&self, config: CaptureConfiguration) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::Replace(Box::new(config))).await
    }

    pub async fn set_sensors(&self, sensors: Vec<Sensor>) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::Sensors(sensors)).await
    }

    /// Switch capture mode; running recordings are released before the old binding goes
    pub async fn set_capture_mode(&self, mode: CaptureMode) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::CaptureMode(mode)).await
    }

    pub async fn set_aspect_ratio(&self, ratio: AspectRatio) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::AspectRatio(ratio)).await
    }

    /// Returns the new binding when the still-capture flash changed; a torch-only
    /// change is applied live.
    pub async fn set_flash_mode(&self, mode: FlashMode) -> Result<Option<BindOutcome>, SessionError> {
        self.exec(move |core| core.set_flash_mode(mode)).await
    }

    /// Linear zoom in [0, 1], applied to the bound primary device without a rebind
    pub async fn set_zoom(&self, level: f32) -> Result<(), SessionError> {
        self.exec(move |core| core.set_zoom(level)).await
    }

    pub async fn start_analysis(&self) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::StartAnalysis).await
    }

    pub async fn stop_analysis(&self) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::StopAnalysis).await
    }

    /// Store analysis parameters. `width <= 0` uses the configured default and
    /// `max_fps` of zero or less means uncapped. With `auto_start` the settings
    /// become active immediately, otherwise analysis stays off until started.
    pub async fn setup_analysis(
        &self,
        format: AnalysisFormat,
        width: i64,
        max_fps: Option<f64>,
        auto_start: bool,
    ) -> Result<Option<BindOutcome>, SessionError> {
        let settings = AnalysisSettings::from_raw(format, width, max_fps);
        self.exec(move |core| core.setup_analysis(settings, auto_start))
            .await
    }

    pub async fn set_photo_size(&self, size: Size) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::PhotoSize(size)).await
    }

    pub async fn set_preview_size(&self, size: Size) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::PreviewSize(size)).await
    }

    pub async fn set_mirror_front_camera(&self, mirror: bool) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::MirrorFrontCamera(mirror)).await
    }

    pub async fn set_extension_mode(&self, mode: Option<ExtensionMode>) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::Extension(mode)).await
    }

    pub async fn set_video_quality(&self, quality: VideoQuality) -> Result<BindOutcome, SessionError> {
        self.reconfigure(ConfigChange::VideoQuality(quality)).await
    }

    /// Takes effect on the next recording only
    pub async fn set_recording_audio_mode(&self, enabled: bool) -> Result<(), SessionError> {
        self.exec(move |core| {
            core.config.as_mut().ok_or_else(not_configured)?.enable_audio_recording = enabled;
            Ok(())
        })
        .await
    }

    /// Map `brightness` in [0, 1] onto the primary device's exposure index range
    pub async fn set_exposure_correction(&self, brightness: f32) -> Result<i32, SessionError> {
        self.exec(move |core| core.set_exposure(brightness)).await
    }

    /// Meter and focus on (`x`, `y`) in preview coordinates.
    ///
    /// `auto_cancel_ms` of `None` uses the 2500 ms default; zero or less keeps
    /// the region until the next request.
    pub async fn focus_on_point(
        &self,
        preview: Size,
        x: f32,
        y: f32,
        auto_cancel_ms: Option<i64>,
    ) -> Result<(), SessionError> {
        self.exec(move |core| core.focus_on_point(preview, x, y, auto_cancel_ms))
            .await
    }

    pub async fn zoom_state(&self) -> Result<ZoomState, SessionError> {
        self.exec(|core| Ok(core.primary()?.zoom_state())).await
    }

    pub async fn min_zoom(&self) -> Result<f32, SessionError> {
        Ok(self.zoom_state().await?.min_ratio)
    }

    pub async fn max_zoom(&self) -> Result<f32, SessionError> {
        Ok(self.zoom_state().await?.max_ratio)
    }

    pub async fn linear_to_ratio(&self, linear: f32) -> Result<f32, SessionError> {
        Ok(self.zoom_state().await?.linear_to_ratio(linear))
    }

    pub async fn available_preview_sizes(&self) -> Result<Vec<Size>, SessionError> {
        self.exec(|core| Ok(core.primary()?.available_preview_sizes()))
            .await
    }

    /// One photo per bound sensor. Sensor and path counts must match each
    /// other and the number of bound still-capture sensors; results come back
    /// per sensor.
    pub async fn take_photo(
        &self,
        sensors: Vec<Sensor>,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<Result<PathBuf, SessionError>>, SessionError> {
        let tickets = self.exec(move |core| core.take_photo(sensors, paths)).await?;
        let timeout = self.settings.recording.stop_timeout();
        let mut results = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            results.push(match ticket {
                Ok(ack) => await_capture_ack(ack, timeout, "photo").await,
                Err(e) => Err(e),
            });
        }
        Ok(results)
    }

    /// Audio follows the configuration at the moment the recording starts
    pub async fn start_recording(
        &self,
        sensors: Vec<Sensor>,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<RecordingInfo>, SessionError> {
        self.exec(move |core| core.start_recording(sensors, paths))
            .await
    }

    pub async fn pause_recording(&self) -> Result<(), SessionError> {
        self.exec(|core| core.recordings.pause_all()).await
    }

    pub async fn resume_recording(&self) -> Result<(), SessionError> {
        self.exec(|core| core.recordings.resume_all()).await
    }

    pub async fn recordings(&self) -> Result<Vec<RecordingInfo>, SessionError> {
        self.exec(|core| Ok(core.recordings.infos())).await
    }

    /// Stop every recording. The recordings are released at once; their
    /// acknowledgements are awaited for at most the configured stop timeout
    /// in total, and the first failure is returned.
    pub async fn stop_recording(&self) -> Result<Vec<PathBuf>, SessionError> {
        let pending = self.exec(|core| core.stop_recording()).await?;
        let deadline = Instant::now() + self.settings.recording.stop_timeout();

        let mut paths = Vec::with_capacity(pending.len());
        let mut failure = None;
        for stop in pending {
            let recording_id = stop.info.id;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = stop.wait(remaining).await;
            let _ = self.events.send(SessionEvent::RecordingStopped {
                recording_id,
                success: result.is_ok(),
            });
            match result {
                Ok(path) => paths.push(path),
                Err(e) => {
                    log::warn!("Recording {} did not stop cleanly: {}", recording_id, e);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(paths),
        }
    }

    pub async fn state(&self) -> Result<BinderState, SessionError> {
        self.exec(|core| Ok(core.binder.state())).await
    }

    pub async fn configuration(&self) -> Result<Option<CaptureConfiguration>, SessionError> {
        self.exec(|core| Ok(core.config.clone())).await
    }

    pub async fn current_binding(&self) -> Result<Option<BindOutcome>, SessionError> {
        self.exec(|core| Ok(core.binder.binding().map(|b| b.outcome.clone())))
            .await
    }

    /// Attach the analysis consumer, replacing any previous one
    pub fn attach_analysis_consumer(&self) -> AnalysisReceiver {
        self.analysis
            .attach_consumer(self.settings.analysis.consumer_capacity)
    }

    pub fn detach_analysis_consumer(&self) {
        self.analysis.detach_consumer();
    }

    /// Consumer acknowledgement for the in-flight analysis frame
    pub fn received_frame(&self) {
        self.analysis.acknowledge();
    }

    pub fn analysis_stats(&self) -> AnalysisStats {
        self.analysis.stats()
    }

    pub fn is_multi_cam_supported(&self) -> bool {
        self.probe.supports_concurrent_cameras()
    }

    pub fn is_video_recording_and_analysis_supported(&self, position: SensorPosition) -> bool {
        self.probe.video_with_analysis_supported(
            position,
            self.settings.capabilities.video_analysis_min_level,
        )
    }

    pub fn is_extension_available(&self, mode: ExtensionMode, position: SensorPosition) -> bool {
        self.probe.extension_available(mode, &Sensor::new(position))
    }

    /// Unbind everything, release pending buffers and stop the session thread
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply: tx }).is_ok() {
            let _ = rx.await;
        }
        let worker = recover_lock(&self.worker).take();
        if let Some(worker) = worker {
            let joined = tokio::task::spawn_blocking(move || worker.join())
                .await
                .map_err(|e| SessionError::Closed(format!("join failed: {}", e)))?;
            if joined.is_err() {
                log::error!("Session thread panicked");
            }
        }
        log::info!("Camera session {} shut down", self.id);
        Ok(())
    }
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("id", &self.id)
            .field("analysis", &self.analysis)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCameraProvider, ProviderEvent};

    fn session(provider: &FakeCameraProvider) -> CameraSession {
        CameraSession::with_defaults(Arc::new(provider.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_mutator_before_configure_fails() {
        let provider = FakeCameraProvider::new();
        let session = session(&provider);
        let result = session.set_aspect_ratio(AspectRatio::Ratio16x9).await;
        assert!(matches!(result, Err(SessionError::Configuration(_))));
        assert_eq!(provider.bind_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_change_keeps_previous_binding() {
        let provider = FakeCameraProvider::new();
        let session = session(&provider);
        session
            .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
            .await
            .unwrap();
        let result = session.set_sensors(vec![]).await;
        assert!(matches!(result, Err(SessionError::Configuration(_))));
        assert_eq!(session.state().await.unwrap(), BinderState::Bound);
        assert_eq!(provider.bind_count(), 1);
    }

    #[tokio::test]
    async fn test_torch_only_flash_change_does_not_rebind() {
        let provider = FakeCameraProvider::new();
        let session = session(&provider);
        session
            .configure_session(
                CaptureConfiguration::new(vec![Sensor::back()]).with_capture_mode(CaptureMode::Video),
            )
            .await
            .unwrap();

        let outcome = session.set_flash_mode(FlashMode::Always).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(provider.bind_count(), 1);
        assert!(provider.torch_enabled(SensorPosition::Back));
    }

    #[tokio::test]
    async fn test_still_flash_change_rebinds_photo_session() {
        let provider = FakeCameraProvider::new();
        let session = session(&provider);
        session
            .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
            .await
            .unwrap();
        let outcome = session.set_flash_mode(FlashMode::Auto).await.unwrap();
        assert!(outcome.is_some());
        assert_eq!(provider.bind_count(), 2);
    }

    #[tokio::test]
    async fn test_focus_auto_cancel_rules() {
        let provider = FakeCameraProvider::new();
        let session = session(&provider);
        session
            .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
            .await
            .unwrap();

        let preview = Size::new(1000, 500);
        session.focus_on_point(preview, 500.0, 250.0, None).await.unwrap();
        session.focus_on_point(preview, 0.0, 0.0, Some(0)).await.unwrap();
        session.focus_on_point(preview, 0.0, 0.0, Some(800)).await.unwrap();

        let cancels: Vec<Option<Duration>> = provider
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ProviderEvent::Focus { auto_cancel, point, .. } => {
                    assert!((0.0..=1.0).contains(&point.x));
                    Some(auto_cancel)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            cancels,
            vec![
                Some(DEFAULT_FOCUS_AUTO_CANCEL),
                None,
                Some(Duration::from_millis(800))
            ]
        );
    }

    #[tokio::test]
    async fn test_setup_analysis_without_auto_start_stays_off() {
        let provider = FakeCameraProvider::new();
        let session = session(&provider);
        session
            .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
            .await
            .unwrap();

        let outcome = session
            .setup_analysis(AnalysisFormat::Jpeg, 0, Some(0.0), false)
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert!(!provider.has_frame_sink());

        let outcome = session.start_analysis().await.unwrap();
        assert!(outcome.use_cases[0].contains(&UseCaseKind::Analysis));
        let config = session.configuration().await.unwrap().unwrap();
        let analysis = config.analysis.unwrap();
        assert_eq!(analysis.output_format, AnalysisFormat::Jpeg);
        assert_eq!(analysis.max_frames_per_second, None);
    }

    #[tokio::test]
    async fn test_shutdown_unbinds_and_closes() {
        let provider = FakeCameraProvider::new();
        let session = session(&provider);
        session
            .configure_session(CaptureConfiguration::new(vec![Sensor::back()]))
            .await
            .unwrap();
        session.shutdown().await.unwrap();
        assert_eq!(provider.active_bindings(), 0);
        assert!(matches!(session.state().await, Err(SessionError::Closed(_))));
    }
}

//! In-memory camera provider
//!
//! Behaves like a single-client camera stack: a second bind without an
//! unbind in between fails with `Busy`. Every call is logged so tests can
//! assert ordering, and every injected frame carries a lease that is counted
//! when the buffer comes back.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::analysis::frame::{Frame, FrameLease};
use crate::errors::{recover_lock, ProviderError};
use crate::platform::{
    ActiveRecording, BindRequest, BoundCamera, CameraProvider, CaptureAck, ExposureState,
    FrameSink, MeteringPoint, PhotoRequest, RecordingRequest, ZoomState,
};
use crate::session::use_cases::UseCaseKind;
use crate::types::{
    ExtensionMode, HardwareLevel, Rational, Sensor, SensorPosition, SensorType, Size, StillFlash,
};

/// Placeholder bytes written for every fake photo
pub const FAKE_PHOTO_BYTES: &[u8] = b"\xFF\xD8crabcam-fake-photo\xFF\xD9";
/// Placeholder bytes written for every fake recording
pub const FAKE_VIDEO_BYTES: &[u8] = b"crabcam-fake-video";

/// How the fake answers a stop-recording request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckBehaviour {
    #[default]
    Succeed,
    Fail,
    /// Hold the acknowledgement forever
    Never,
}

/// One bound sensor as recorded at bind time
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSensorRecord {
    pub sensor: Sensor,
    pub use_cases: Vec<UseCaseKind>,
    pub still_flash: Option<StillFlash>,
    pub viewport: Rational,
    pub extension: Option<ExtensionMode>,
}

/// Provider call log entry
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Bind { binding: u64, sensors: Vec<BoundSensorRecord> },
    Unbind,
    Torch { position: SensorPosition, enabled: bool },
    Zoom { position: SensorPosition, linear: f32 },
    Exposure { position: SensorPosition, index: i32 },
    Focus { position: SensorPosition, point: MeteringPoint, auto_cancel: Option<Duration> },
    Photo { position: SensorPosition, path: PathBuf, mirrored: bool },
    RecordingStarted { position: SensorPosition, path: PathBuf, with_audio: bool },
    RecordingPaused { position: SensorPosition },
    RecordingResumed { position: SensorPosition },
    RecordingStopped { position: SensorPosition },
}

struct FakeState {
    concurrent: bool,
    levels: HashMap<SensorPosition, HardwareLevel>,
    extensions: HashSet<ExtensionMode>,
    fail_next_bind: Option<ProviderError>,
    recording_ack: AckBehaviour,
    photo_ack: AckBehaviour,
    sensor_rotation: i32,
    zoom_range: (f32, f32),
    exposure_range: (i32, i32),
    bind_delay: Duration,
    events: Vec<ProviderEvent>,
    active_bindings: usize,
    max_active_bindings: usize,
    binding_seq: u64,
    cameras: Vec<Arc<FakeBoundCamera>>,
    sink: Option<Arc<dyn FrameSink>>,
    // held so that a `Never` ack stays pending instead of reading as cancelled
    withheld_acks: Vec<oneshot::Sender<Result<PathBuf, ProviderError>>>,
}

type SharedState = Arc<Mutex<FakeState>>;

/// In-memory [`CameraProvider`]. Clones share state.
#[derive(Clone)]
pub struct FakeCameraProvider {
    state: SharedState,
    frames_emitted: Arc<AtomicU64>,
    frames_released: Arc<AtomicU64>,
}

impl FakeCameraProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                concurrent: true,
                levels: HashMap::new(),
                extensions: HashSet::new(),
                fail_next_bind: None,
                recording_ack: AckBehaviour::Succeed,
                photo_ack: AckBehaviour::Succeed,
                sensor_rotation: 90,
                zoom_range: (1.0, 8.0),
                exposure_range: (-12, 12),
                bind_delay: Duration::ZERO,
                events: Vec::new(),
                active_bindings: 0,
                max_active_bindings: 0,
                binding_seq: 0,
                cameras: Vec::new(),
                sink: None,
                withheld_acks: Vec::new(),
            })),
            frames_emitted: Arc::new(AtomicU64::new(0)),
            frames_released: Arc::new(AtomicU64::new(0)),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        recover_lock(&self.state)
    }

    pub fn with_concurrent_support(self, supported: bool) -> Self {
        self.state().concurrent = supported;
        self
    }

    pub fn with_hardware_level(self, position: SensorPosition, level: HardwareLevel) -> Self {
        self.state().levels.insert(position, level);
        self
    }

    pub fn with_extension(self, mode: ExtensionMode) -> Self {
        self.state().extensions.insert(mode);
        self
    }

    pub fn with_recording_ack(self, behaviour: AckBehaviour) -> Self {
        self.state().recording_ack = behaviour;
        self
    }

    pub fn with_photo_ack(self, behaviour: AckBehaviour) -> Self {
        self.state().photo_ack = behaviour;
        self
    }

    pub fn with_sensor_rotation(self, degrees: i32) -> Self {
        self.state().sensor_rotation = degrees;
        self
    }

    pub fn with_zoom_range(self, min_ratio: f32, max_ratio: f32) -> Self {
        self.state().zoom_range = (min_ratio, max_ratio);
        self
    }

    pub fn with_exposure_range(self, min_index: i32, max_index: i32) -> Self {
        self.state().exposure_range = (min_index, max_index);
        self
    }

    /// Make every bind call take `delay`
    pub fn with_bind_delay(self, delay: Duration) -> Self {
        self.state().bind_delay = delay;
        self
    }

    /// The next bind call fails with `error`
    pub fn fail_next_bind(&self, error: ProviderError) {
        self.state().fail_next_bind = Some(error);
    }

    pub fn set_recording_ack(&self, behaviour: AckBehaviour) {
        self.state().recording_ack = behaviour;
    }

    pub fn events(&self) -> Vec<ProviderEvent> {
        self.state().events.clone()
    }

    pub fn binds(&self) -> Vec<Vec<BoundSensorRecord>> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                ProviderEvent::Bind { sensors, .. } => Some(sensors.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn bind_count(&self) -> usize {
        self.binds().len()
    }

    pub fn last_bind(&self) -> Option<Vec<BoundSensorRecord>> {
        self.binds().pop()
    }

    pub fn active_bindings(&self) -> usize {
        self.state().active_bindings
    }

    /// Highest number of simultaneous bindings ever observed
    pub fn max_active_bindings(&self) -> usize {
        self.state().max_active_bindings
    }

    pub fn torch_enabled(&self, position: SensorPosition) -> bool {
        self.state()
            .cameras
            .iter()
            .find(|c| c.sensor.position == position)
            .map(|c| *recover_lock(&c.torch))
            .unwrap_or(false)
    }

    pub fn zoom_linear(&self, position: SensorPosition) -> Option<f32> {
        self.state()
            .cameras
            .iter()
            .find(|c| c.sensor.position == position)
            .map(|c| recover_lock(&c.zoom).linear)
    }

    pub fn exposure_index(&self, position: SensorPosition) -> Option<i32> {
        self.state()
            .cameras
            .iter()
            .find(|c| c.sensor.position == position)
            .map(|c| recover_lock(&c.exposure).index)
    }

    pub fn has_frame_sink(&self) -> bool {
        self.state().sink.is_some()
    }

    /// Deliver `frame` to the bound analysis sink, as the hardware would.
    ///
    /// Returns whether a sink received it; without one the buffer comes
    /// straight back.
    pub fn emit_frame(&self, frame: Frame) -> bool {
        self.frames_emitted.fetch_add(1, Ordering::SeqCst);
        let released = self.frames_released.clone();
        let frame = frame.with_lease(FrameLease::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }));

        let sink = self.state().sink.clone();
        match sink {
            Some(sink) => {
                sink.on_frame(frame);
                true
            }
            None => {
                frame.release();
                false
            }
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::SeqCst)
    }

    pub fn frames_released(&self) -> u64 {
        self.frames_released.load(Ordering::SeqCst)
    }

    fn record_bound(&self, requests: &[BindRequest]) -> Result<Vec<Arc<dyn BoundCamera>>, ProviderError> {
        let delay = self.state().bind_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.state();
        if let Some(error) = state.fail_next_bind.take() {
            return Err(error);
        }
        if state.active_bindings > 0 {
            return Err(ProviderError::Busy("a binding is already active".to_string()));
        }
        if requests.len() > 1 && !state.concurrent {
            return Err(ProviderError::Unsupported("concurrent cameras".to_string()));
        }

        state.binding_seq += 1;
        state.active_bindings += 1;
        state.max_active_bindings = state.max_active_bindings.max(state.active_bindings);

        let mut records = Vec::with_capacity(requests.len());
        let mut bound: Vec<Arc<dyn BoundCamera>> = Vec::with_capacity(requests.len());
        for request in requests {
            if let Some(spec) = request.use_cases.analysis() {
                state.sink = Some(spec.sink.clone());
            }
            let camera = Arc::new(FakeBoundCamera {
                sensor: request.sensor.clone(),
                use_cases: request.use_cases.kinds(),
                state: self.state.clone(),
                rotation: state.sensor_rotation,
                torch: Mutex::new(false),
                zoom: Mutex::new(ZoomState {
                    min_ratio: state.zoom_range.0,
                    max_ratio: state.zoom_range.1,
                    linear: 0.0,
                }),
                exposure: Mutex::new(ExposureState {
                    min_index: state.exposure_range.0,
                    max_index: state.exposure_range.1,
                    index: 0,
                }),
            });
            records.push(BoundSensorRecord {
                sensor: request.sensor.clone(),
                use_cases: request.use_cases.kinds(),
                still_flash: request.use_cases.still_flash(),
                viewport: request.viewport,
                extension: request.extension,
            });
            state.cameras.push(camera.clone());
            bound.push(camera);
        }

        let binding = state.binding_seq;
        state.events.push(ProviderEvent::Bind {
            binding,
            sensors: records,
        });
        Ok(bound)
    }
}

impl Default for FakeCameraProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraProvider for FakeCameraProvider {
    fn sensors(&self) -> Vec<Sensor> {
        vec![
            Sensor::back().with_device_id("0").with_type(SensorType::WideAngle),
            Sensor::front().with_device_id("1").with_type(SensorType::WideAngle),
        ]
    }

    fn supports_concurrent_cameras(&self) -> bool {
        self.state().concurrent
    }

    fn hardware_level(&self, sensor: &Sensor) -> HardwareLevel {
        self.state()
            .levels
            .get(&sensor.position)
            .copied()
            .unwrap_or(HardwareLevel::Level3)
    }

    fn extension_available(&self, mode: ExtensionMode, _sensor: &Sensor) -> bool {
        self.state().extensions.contains(&mode)
    }

    fn bind(&self, request: &BindRequest) -> Result<Arc<dyn BoundCamera>, ProviderError> {
        let mut bound = self.record_bound(std::slice::from_ref(request))?;
        bound
            .pop()
            .ok_or_else(|| ProviderError::Other("bind produced no camera".to_string()))
    }

    fn bind_concurrent(&self, requests: &[BindRequest]) -> Result<Vec<Arc<dyn BoundCamera>>, ProviderError> {
        self.record_bound(requests)
    }

    fn unbind_all(&self) {
        let mut state = self.state();
        state.active_bindings = 0;
        state.cameras.clear();
        state.sink = None;
        state.events.push(ProviderEvent::Unbind);
    }
}

struct FakeBoundCamera {
    sensor: Sensor,
    use_cases: Vec<UseCaseKind>,
    state: SharedState,
    rotation: i32,
    torch: Mutex<bool>,
    zoom: Mutex<ZoomState>,
    exposure: Mutex<ExposureState>,
}

impl FakeBoundCamera {
    fn log(&self, event: ProviderEvent) {
        recover_lock(&self.state).events.push(event);
    }

    fn require(&self, kind: UseCaseKind) -> Result<(), ProviderError> {
        if self.use_cases.contains(&kind) {
            Ok(())
        } else {
            Err(ProviderError::Unsupported(format!("{:?} is not bound", kind)))
        }
    }
}

impl BoundCamera for FakeBoundCamera {
    fn sensor(&self) -> Sensor {
        self.sensor.clone()
    }

    fn enable_torch(&self, enabled: bool) -> Result<(), ProviderError> {
        *recover_lock(&self.torch) = enabled;
        self.log(ProviderEvent::Torch {
            position: self.sensor.position,
            enabled,
        });
        Ok(())
    }

    fn zoom_state(&self) -> ZoomState {
        *recover_lock(&self.zoom)
    }

    fn set_linear_zoom(&self, linear: f32) -> Result<(), ProviderError> {
        recover_lock(&self.zoom).linear = linear.clamp(0.0, 1.0);
        self.log(ProviderEvent::Zoom {
            position: self.sensor.position,
            linear,
        });
        Ok(())
    }

    fn exposure_state(&self) -> ExposureState {
        *recover_lock(&self.exposure)
    }

    fn set_exposure_index(&self, index: i32) -> Result<(), ProviderError> {
        let mut exposure = recover_lock(&self.exposure);
        if index < exposure.min_index || index > exposure.max_index {
            return Err(ProviderError::Other(format!("exposure index {} out of range", index)));
        }
        exposure.index = index;
        drop(exposure);
        self.log(ProviderEvent::Exposure {
            position: self.sensor.position,
            index,
        });
        Ok(())
    }

    fn sensor_rotation_degrees(&self) -> i32 {
        self.rotation
    }

    fn start_focus_and_metering(
        &self,
        point: MeteringPoint,
        auto_cancel: Option<Duration>,
    ) -> Result<(), ProviderError> {
        self.log(ProviderEvent::Focus {
            position: self.sensor.position,
            point,
            auto_cancel,
        });
        Ok(())
    }

    fn available_preview_sizes(&self) -> Vec<Size> {
        vec![
            Size::new(1920, 1080),
            Size::new(1440, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
        ]
    }

    fn take_picture(&self, request: PhotoRequest) -> Result<CaptureAck, ProviderError> {
        self.require(UseCaseKind::StillCapture)?;
        self.log(ProviderEvent::Photo {
            position: self.sensor.position,
            path: request.path.clone(),
            mirrored: request.mirror_horizontally,
        });

        let (tx, rx) = oneshot::channel();
        let behaviour = recover_lock(&self.state).photo_ack;
        match behaviour {
            AckBehaviour::Succeed => {
                let result = std::fs::write(&request.path, FAKE_PHOTO_BYTES)
                    .map(|_| request.path.clone())
                    .map_err(|e| ProviderError::Other(format!("write failed: {}", e)));
                let _ = tx.send(result);
            }
            AckBehaviour::Fail => {
                let _ = tx.send(Err(ProviderError::Other("capture failed".to_string())));
            }
            AckBehaviour::Never => recover_lock(&self.state).withheld_acks.push(tx),
        }
        Ok(rx)
    }

    fn start_recording(&self, request: RecordingRequest) -> Result<Box<dyn ActiveRecording>, ProviderError> {
        self.require(UseCaseKind::VideoCapture)?;
        self.log(ProviderEvent::RecordingStarted {
            position: self.sensor.position,
            path: request.path.clone(),
            with_audio: request.with_audio,
        });
        Ok(Box::new(FakeRecording {
            position: self.sensor.position,
            path: request.path,
            state: self.state.clone(),
            paused: false,
        }))
    }
}

struct FakeRecording {
    position: SensorPosition,
    path: PathBuf,
    state: SharedState,
    paused: bool,
}

impl FakeRecording {
    fn log(&self, event: ProviderEvent) {
        recover_lock(&self.state).events.push(event);
    }
}

impl ActiveRecording for FakeRecording {
    fn pause(&mut self) -> Result<(), ProviderError> {
        self.paused = true;
        self.log(ProviderEvent::RecordingPaused {
            position: self.position,
        });
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ProviderError> {
        if !self.paused {
            return Err(ProviderError::Other("recording is not paused".to_string()));
        }
        self.paused = false;
        self.log(ProviderEvent::RecordingResumed {
            position: self.position,
        });
        Ok(())
    }

    fn stop(self: Box<Self>) -> CaptureAck {
        self.log(ProviderEvent::RecordingStopped {
            position: self.position,
        });
        let (tx, rx) = oneshot::channel();
        let behaviour = recover_lock(&self.state).recording_ack;
        match behaviour {
            AckBehaviour::Succeed => {
                let result = std::fs::write(&self.path, FAKE_VIDEO_BYTES)
                    .map(|_| self.path.clone())
                    .map_err(|e| ProviderError::Other(format!("write failed: {}", e)));
                let _ = tx.send(result);
            }
            AckBehaviour::Fail => {
                let _ = tx.send(Err(ProviderError::Other("encoder failure".to_string())));
            }
            AckBehaviour::Never => recover_lock(&self.state).withheld_acks.push(tx),
        }
        rx
    }
}

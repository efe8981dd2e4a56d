//! Session binding state machine
//!
//! `Unbound -> Binding -> Bound -> Unbound`. Every rebind tears the previous
//! binding down first and builds the next one from the configuration alone;
//! nothing carries over between bindings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::configuration::CaptureConfiguration;
use super::events::SessionEvent;
use super::use_cases::{analysis_target_size, build_use_cases, AnalysisSpec, UseCaseKind};
use crate::analysis::pipeline::AnalysisPipeline;
use crate::capability::{CapabilityDowngrade, CapabilityProbe, MultiSensorPolicy};
use crate::check_invariant;
use crate::errors::SessionError;
use crate::invariants::Invariant;
use crate::platform::{BindRequest, BoundCamera, CameraProvider, FrameSink};
use crate::types::{CaptureMode, HardwareLevel, Sensor, StillFlash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinderState {
    Unbound,
    Binding,
    Bound,
}

/// Policies the binder applies on every bind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinderPolicy {
    pub multi_sensor: MultiSensorPolicy,
    pub video_analysis_min_level: HardwareLevel,
    pub default_analysis_width: u32,
}

impl Default for BinderPolicy {
    fn default() -> Self {
        Self {
            multi_sensor: MultiSensorPolicy::Downgrade,
            video_analysis_min_level: HardwareLevel::Level3,
            default_analysis_width: 1024,
        }
    }
}

/// Result of a successful bind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindOutcome {
    pub binding_id: Uuid,
    /// Sensors actually bound, primary first
    pub sensors: Vec<Sensor>,
    /// Use cases per bound sensor, same order as `sensors`
    pub use_cases: Vec<Vec<UseCaseKind>>,
    pub downgrades: Vec<CapabilityDowngrade>,
    pub bound_at: DateTime<Utc>,
}

impl BindOutcome {
    pub fn is_downgraded(&self) -> bool {
        !self.downgrades.is_empty()
    }
}

/// The live binding: device handles plus what was bound
pub struct SessionBinding {
    pub outcome: BindOutcome,
    cameras: Vec<Arc<dyn BoundCamera>>,
}

impl SessionBinding {
    pub fn id(&self) -> Uuid {
        self.outcome.binding_id
    }

    pub fn primary(&self) -> Option<&Arc<dyn BoundCamera>> {
        self.cameras.first()
    }

    pub fn cameras(&self) -> &[Arc<dyn BoundCamera>] {
        &self.cameras
    }
}

impl std::fmt::Debug for SessionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBinding")
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

pub struct SessionBinder {
    provider: Arc<dyn CameraProvider>,
    probe: CapabilityProbe,
    policy: BinderPolicy,
    analysis: Arc<AnalysisPipeline>,
    events: broadcast::Sender<SessionEvent>,
    state: BinderState,
    binding: Option<SessionBinding>,
    live_bindings: usize,
}

impl SessionBinder {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        policy: BinderPolicy,
        analysis: Arc<AnalysisPipeline>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            probe: CapabilityProbe::new(provider.clone()),
            provider,
            policy,
            analysis,
            events,
            state: BinderState::Unbound,
            binding: None,
            live_bindings: 0,
        }
    }

    pub fn state(&self) -> BinderState {
        self.state
    }

    pub fn binding(&self) -> Option<&SessionBinding> {
        self.binding.as_ref()
    }

    pub fn primary_camera(&self) -> Option<Arc<dyn BoundCamera>> {
        self.binding.as_ref().and_then(|b| b.primary().cloned())
    }

    pub fn probe(&self) -> &CapabilityProbe {
        &self.probe
    }

    pub fn policy(&self) -> BinderPolicy {
        self.policy
    }

    /// Tear down the current binding, if any
    pub fn unbind(&mut self) {
        self.provider.unbind_all();
        if let Some(binding) = self.binding.take() {
            self.live_bindings = self.live_bindings.saturating_sub(1);
            log::info!("Unbound session binding {}", binding.id());
            let _ = self.events.send(SessionEvent::Unbound {
                binding_id: binding.id(),
            });
        }
        self.state = BinderState::Unbound;
    }

    /// Replace the current binding with one derived from `config`.
    ///
    /// On any failure the session is left unbound.
    pub fn rebind(&mut self, config: &CaptureConfiguration) -> Result<BindOutcome, SessionError> {
        config.validate()?;

        self.unbind();
        self.state = BinderState::Binding;

        match self.bind(config) {
            Ok(binding) => {
                let outcome = binding.outcome.clone();
                self.binding = Some(binding);
                self.live_bindings += 1;
                check_invariant!(
                    self.live_bindings == 1,
                    Invariant::SingleBinding,
                    "binder::rebind"
                );
                self.state = BinderState::Bound;
                self.apply_torch(config);

                log::info!(
                    "Bound {} sensor(s) as {}: {:?}",
                    outcome.sensors.len(),
                    outcome.binding_id,
                    outcome.use_cases
                );
                for downgrade in &outcome.downgrades {
                    let _ = self.events.send(SessionEvent::CapabilityDowngrade {
                        downgrade: downgrade.clone(),
                    });
                }
                let _ = self.events.send(SessionEvent::Bound {
                    binding_id: outcome.binding_id,
                    sensors: outcome.sensors.clone(),
                    use_cases: outcome.use_cases.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                self.provider.unbind_all();
                self.state = BinderState::Unbound;
                check_invariant!(
                    self.binding.is_none(),
                    Invariant::FailedBindLeavesUnbound,
                    "binder::rebind"
                );
                log::error!("Bind failed: {}", e);
                let _ = self.events.send(SessionEvent::BindFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Re-apply the torch to the primary device; torch is never a use-case property
    pub fn apply_torch(&self, config: &CaptureConfiguration) {
        if let Some(primary) = self.primary_camera() {
            let enabled = config.flash_mode.torch_enabled();
            if let Err(e) = primary.enable_torch(enabled) {
                log::warn!("Failed to set torch {}: {}", enabled, e);
            }
        }
    }

    fn bind(&self, config: &CaptureConfiguration) -> Result<SessionBinding, SessionError> {
        let mut downgrades = Vec::new();

        let (sensors, downgrade) = self
            .probe
            .resolve_sensors(&config.sensors, self.policy.multi_sensor)?;
        downgrades.extend(downgrade);
        let primary = sensors
            .first()
            .cloned()
            .ok_or_else(|| SessionError::configuration("at least one sensor is required"))?;

        let mut analysis = config.analysis;
        if analysis.is_some() && config.capture_mode == CaptureMode::Video {
            if let Some(downgrade) = self
                .probe
                .check_video_analysis(&primary, self.policy.video_analysis_min_level)
            {
                downgrades.push(downgrade);
                analysis = None;
            }
        }

        let extension = match config.extension {
            Some(mode) if !self.probe.extension_available(mode, &primary) => {
                log::warn!("Extension {:?} unavailable on {:?}", mode, primary.position);
                downgrades.push(CapabilityDowngrade::ExtensionUnavailable { mode });
                None
            }
            other => other,
        };

        if let Some(settings) = &analysis {
            self.analysis.configure(settings);
        }
        let mut analysis_spec = analysis.map(|settings| {
            let width = settings
                .target_width
                .unwrap_or(self.policy.default_analysis_width);
            AnalysisSpec {
                target_size: analysis_target_size(width, config.aspect_ratio),
                source_format: settings.output_format.source_format(),
                output_format: settings.output_format,
                sink: self.analysis.clone() as Arc<dyn FrameSink>,
            }
        });

        let requests: Vec<BindRequest> = sensors
            .iter()
            .enumerate()
            .map(|(index, sensor)| {
                let analysis = if index == 0 { analysis_spec.take() } else { None };
                BindRequest {
                    sensor: sensor.clone(),
                    use_cases: build_use_cases(config, index, analysis),
                    viewport: config.aspect_ratio.viewport(),
                    extension: if index == 0 { extension } else { None },
                }
            })
            .collect();

        for request in requests.iter().skip(1) {
            check_invariant!(
                !request.use_cases.contains(UseCaseKind::Analysis),
                Invariant::AnalysisOnPrimaryOnly,
                "binder::bind"
            );
            check_invariant!(
                matches!(request.use_cases.still_flash(), None | Some(StillFlash::Off)),
                Invariant::FlashOnPrimaryOnly,
                "binder::bind"
            );
        }
        check_invariant!(
            self.binding.is_none(),
            Invariant::UnbindBeforeBind,
            "binder::bind"
        );

        let cameras = if requests.len() > 1 {
            self.provider.bind_concurrent(&requests)?
        } else {
            vec![self.provider.bind(&requests[0])?]
        };

        Ok(SessionBinding {
            outcome: BindOutcome {
                binding_id: Uuid::new_v4(),
                sensors,
                use_cases: requests.iter().map(|r| r.use_cases.kinds()).collect(),
                downgrades,
                bound_at: Utc::now(),
            },
            cameras,
        })
    }
}

impl std::fmt::Debug for SessionBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBinder")
            .field("state", &self.state)
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}
